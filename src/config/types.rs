//! Raw model definition types matching the JSON config.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    /// PostgreSQL type name, e.g. `integer`, `text`, `jsonb`, `timestamptz`.
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// SQL default expression, e.g. `now()` or `gen_random_uuid()`.
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub validate: Option<ValidationRule>,
}

fn default_true() -> bool {
    true
}

fn default_pk() -> String {
    "id".into()
}

fn default_schema() -> String {
    "public".into()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// We hold the foreign key to the target.
    BelongsTo,
    /// The target holds a foreign key to us; at most one row.
    HasOne,
    /// The target holds a foreign key to us.
    HasMany,
    /// Linked through a join table.
    BelongsToMany,
}

impl RelationKind {
    pub fn is_to_many(self) -> bool {
        matches!(self, RelationKind::HasMany | RelationKind::BelongsToMany)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThroughConfig {
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    /// Join column referencing the source model's primary key.
    pub source_key: String,
    /// Join column referencing the target model's primary key.
    pub target_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    pub name: String,
    pub kind: RelationKind,
    /// Name of the target model.
    pub target: String,
    /// For belongs_to: our column. For has_one/has_many: the target's column.
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub through: Option<ThroughConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderConfig {
    Column(String),
    Pair(String, String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScopeConfig {
    pub name: String,
    #[serde(default, rename = "where")]
    pub where_: Option<Value>,
    #[serde(default)]
    pub attributes: Option<Vec<String>>,
    #[serde(default)]
    pub order: Option<OrderConfig>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub path_segment: Option<String>,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_pk")]
    pub primary_key: String,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
    #[serde(default)]
    pub public_instance_methods: Vec<String>,
}

/// All model definitions for one application.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    pub models: Vec<ModelConfig>,
}
