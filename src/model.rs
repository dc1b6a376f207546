//! The seam between HTTP handlers and the ORM: everything a controller needs from a model.
//!
//! Instances travel as JSON objects. Two implementations ship with the crate:
//! [`crate::store::PgModel`] (PostgreSQL via sqlx) and [`crate::store::MemoryModel`]
//! (in-process tables, used by tests and prototypes).

use crate::case::relation_key;
use crate::config::{PkType, ResolvedEntity, ResolvedRelation, ResolvedScope, ValidationRule};
use crate::error::AppError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub use crate::query::FindOptions;
use crate::query::Where;

/// Column values of one row.
pub type Row = Map<String, Value>;

#[async_trait]
pub trait Model: Send + Sync {
    /// Definition this model was built from: columns, relations, scopes, public methods.
    fn entity(&self) -> &ResolvedEntity;

    fn name(&self) -> &str {
        self.entity().name()
    }

    fn primary_key(&self) -> &str {
        &self.entity().table.pk_column
    }

    /// Columns of JSON/JSONB type.
    fn json_columns(&self) -> Vec<String> {
        self.entity().json_columns()
    }

    /// Instance methods that may be invoked over HTTP.
    fn public_methods(&self) -> &[String] {
        &self.entity().public_methods
    }

    fn is_public_method(&self, method: &str) -> bool {
        self.public_methods().iter().any(|m| m == method)
    }

    fn validation_rules(&self) -> &HashMap<String, ValidationRule> {
        &self.entity().validation
    }

    fn scope(&self, name: &str) -> Option<&ResolvedScope> {
        self.entity().scopes.get(name)
    }

    /// Find a relation by name; `car-parts`, `carParts` and `car_part` all match `car_parts`.
    fn relation(&self, name: &str) -> Option<&ResolvedRelation> {
        let key = relation_key(name);
        self.entity().relations.iter().find(|r| relation_key(&r.name) == key)
    }

    async fn count(&self, filter: &Where) -> Result<u64, AppError>;

    async fn find_all(&self, opts: &FindOptions) -> Result<Vec<Value>, AppError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>, AppError>;

    async fn create(&self, values: Row) -> Result<Value, AppError>;

    /// Apply `values` to a loaded instance and return the stored result.
    async fn update(&self, instance: &Value, values: Row) -> Result<Value, AppError>;

    /// Delete by primary key. Returns the number of rows removed.
    async fn destroy(&self, id: &str) -> Result<u64, AppError>;

    /// Rows linked to `instance` through a to-many relation.
    async fn get_related(
        &self,
        instance: &Value,
        relation: &ResolvedRelation,
        opts: &FindOptions,
    ) -> Result<Vec<Value>, AppError>;

    /// The single row linked through a to-one relation, if any.
    async fn get_one_related(&self, instance: &Value, relation: &ResolvedRelation) -> Result<Option<Value>, AppError>;

    /// Create a target row already linked to `instance`.
    async fn create_related(&self, instance: &Value, relation: &ResolvedRelation, values: Row) -> Result<Value, AppError>;

    /// Link an existing target row. `Ok(None)` when the link already exists;
    /// `Err(AppError::ForeignKey)` when the target row does not exist.
    async fn add_related(
        &self,
        instance: &Value,
        relation: &ResolvedRelation,
        rel_id: &str,
    ) -> Result<Option<Value>, AppError>;

    /// Remove a link without deleting either row. Returns the number of links removed.
    async fn remove_related(&self, instance: &Value, relation: &ResolvedRelation, rel_id: &str) -> Result<u64, AppError>;
}

/// Parse a path id into the JSON value matching the primary key type.
pub fn parse_id(id_str: &str, pk_type: &PkType) -> Result<Value, AppError> {
    Ok(match pk_type {
        PkType::Uuid => {
            let u = uuid::Uuid::parse_str(id_str).map_err(|_| AppError::BadRequest(format!("invalid uuid '{}'", id_str)))?;
            Value::String(u.to_string())
        }
        PkType::BigInt | PkType::Int => {
            let n: i64 = id_str.parse().map_err(|_| AppError::BadRequest(format!("invalid id '{}'", id_str)))?;
            Value::Number(n.into())
        }
        PkType::Text => Value::String(id_str.to_string()),
    })
}

/// Column value of an instance, `Null` when absent.
pub fn field(instance: &Value, column: &str) -> Value {
    instance.get(column).cloned().unwrap_or(Value::Null)
}

pub fn body_to_row(value: Value) -> Result<Row, AppError> {
    match value {
        Value::Object(m) => Ok(m),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}
