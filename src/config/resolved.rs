//! Resolved entity model: config validated and flattened for runtime use.

use crate::config::{RelationKind, ValidationRule};
use crate::query::{OrderBy, Where};
use std::collections::HashMap;

/// Primary key type for parsing path ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PkType {
    Uuid,
    BigInt,
    Int,
    Text,
}

#[derive(Clone, Debug)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared PostgreSQL type, lowercased.
    pub pg_type: String,
    /// Type used for `$n::type` casts when binding values (serial types map to integers).
    pub cast: String,
    pub nullable: bool,
    /// Whether the column has a DB default (e.g. gen_random_uuid(), now(), serial).
    pub has_default: bool,
    pub default: Option<String>,
    /// JSON/JSONB columns are shallow-merged on PATCH.
    pub is_json: bool,
    pub is_pk: bool,
}

/// Table metadata shared by entities and relation targets.
#[derive(Clone, Debug)]
pub struct TableRef {
    pub model_name: String,
    pub schema_name: String,
    pub table_name: String,
    pub pk_column: String,
    pub pk_type: PkType,
    pub columns: Vec<ColumnInfo>,
}

impl TableRef {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedThrough {
    pub schema_name: String,
    pub table_name: String,
    pub source_key: String,
    pub target_key: String,
}

#[derive(Clone, Debug)]
pub struct ResolvedRelation {
    pub name: String,
    pub kind: RelationKind,
    pub target: TableRef,
    /// See `RelationConfig::foreign_key`; empty for belongs_to_many.
    pub foreign_key: String,
    pub through: Option<ResolvedThrough>,
    /// Column rules of the target model, applied to rows created through this relation.
    pub validation: HashMap<String, ValidationRule>,
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedScope {
    pub name: String,
    pub filter: Where,
    pub attributes: Option<Vec<String>>,
    pub order: Option<OrderBy>,
    pub limit: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct ResolvedEntity {
    pub table: TableRef,
    pub path_segment: String,
    pub relations: Vec<ResolvedRelation>,
    pub scopes: HashMap<String, ResolvedScope>,
    pub public_methods: Vec<String>,
    pub validation: HashMap<String, ValidationRule>,
}

impl ResolvedEntity {
    pub fn name(&self) -> &str {
        &self.table.model_name
    }

    pub fn json_columns(&self) -> Vec<String> {
        self.table.columns.iter().filter(|c| c.is_json).map(|c| c.name.clone()).collect()
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedModel {
    pub entities: Vec<ResolvedEntity>,
    pub entity_by_path: HashMap<String, usize>,
    pub entity_by_name: HashMap<String, usize>,
}

impl ResolvedModel {
    pub fn entity_by_path(&self, path: &str) -> Option<&ResolvedEntity> {
        self.entity_by_path.get(path).map(|&i| &self.entities[i])
    }

    pub fn entity_by_name(&self, name: &str) -> Option<&ResolvedEntity> {
        self.entity_by_name.get(name).map(|&i| &self.entities[i])
    }
}
