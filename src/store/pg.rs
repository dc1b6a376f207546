//! `Model` over PostgreSQL: each call builds one parameterized statement (or one transaction
//! for relation creates) and decodes rows into JSON objects.

use crate::config::{RelationKind, ResolvedEntity, ResolvedModel, ResolvedRelation};
use crate::error::AppError;
use crate::model::{field, parse_id, FindOptions, Model, Row};
use crate::query::Where;
use crate::sql::{self, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool};
use std::sync::Arc;

#[derive(Clone)]
pub struct PgModel {
    pool: PgPool,
    entity: ResolvedEntity,
}

impl PgModel {
    pub fn new(pool: PgPool, entity: ResolvedEntity) -> Self {
        PgModel { pool, entity }
    }

    /// One model per resolved entity, sharing the pool.
    pub fn all(pool: &PgPool, model: &ResolvedModel) -> Vec<Arc<dyn Model>> {
        model
            .entities
            .iter()
            .map(|e| Arc::new(PgModel::new(pool.clone(), e.clone())) as Arc<dyn Model>)
            .collect()
    }

    fn pk_of(&self, instance: &Value) -> Value {
        field(instance, &self.entity.table.pk_column)
    }
}

async fn fetch_all<'e, E: PgExecutor<'e>>(exec: E, q: &QueryBuf) -> Result<Vec<Value>, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.0.clone());
    }
    let rows = query.fetch_all(exec).await.map_err(AppError::from_db)?;
    Ok(rows.iter().map(row_to_json).collect())
}

async fn fetch_optional<'e, E: PgExecutor<'e>>(exec: E, q: &QueryBuf) -> Result<Option<Value>, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.0.clone());
    }
    let row = query.fetch_optional(exec).await.map_err(AppError::from_db)?;
    Ok(row.map(|r| row_to_json(&r)))
}

async fn execute<'e, E: PgExecutor<'e>>(exec: E, q: &QueryBuf) -> Result<u64, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.0.clone());
    }
    let done = query.execute(exec).await.map_err(AppError::from_db)?;
    Ok(done.rows_affected())
}

#[async_trait]
impl Model for PgModel {
    fn entity(&self) -> &ResolvedEntity {
        &self.entity
    }

    async fn count(&self, filter: &Where) -> Result<u64, AppError> {
        let q = sql::count(&self.entity.table, filter)?;
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(p.0.clone());
        }
        let n = query.fetch_one(&self.pool).await.map_err(AppError::from_db)?;
        Ok(n.max(0) as u64)
    }

    async fn find_all(&self, opts: &FindOptions) -> Result<Vec<Value>, AppError> {
        let q = sql::select_list(&self.entity.table, opts)?;
        fetch_all(&self.pool, &q).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>, AppError> {
        let id = parse_id(id, &self.entity.table.pk_type)?;
        let q = sql::select_by_id(&self.entity.table, &id)?;
        fetch_optional(&self.pool, &q).await
    }

    async fn create(&self, values: Row) -> Result<Value, AppError> {
        let q = sql::insert(&self.entity.table, &values)?;
        fetch_optional(&self.pool, &q)
            .await?
            .ok_or_else(|| AppError::Db(sqlx::Error::RowNotFound))
    }

    async fn update(&self, instance: &Value, values: Row) -> Result<Value, AppError> {
        let q = sql::update(&self.entity.table, &self.pk_of(instance), &values)?;
        fetch_optional(&self.pool, &q)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Instance of '{}' Not Found", self.entity.name())))
    }

    async fn destroy(&self, id: &str) -> Result<u64, AppError> {
        let id = parse_id(id, &self.entity.table.pk_type)?;
        let q = sql::delete(&self.entity.table, &id)?;
        execute(&self.pool, &q).await
    }

    async fn get_related(
        &self,
        instance: &Value,
        relation: &ResolvedRelation,
        opts: &FindOptions,
    ) -> Result<Vec<Value>, AppError> {
        let owner_key = match relation.kind {
            RelationKind::BelongsTo => field(instance, &relation.foreign_key),
            _ => self.pk_of(instance),
        };
        if owner_key.is_null() {
            return Ok(Vec::new());
        }
        let q = sql::select_related(&self.entity.table, relation, &owner_key, opts)?;
        fetch_all(&self.pool, &q).await
    }

    async fn get_one_related(&self, instance: &Value, relation: &ResolvedRelation) -> Result<Option<Value>, AppError> {
        let opts = FindOptions { limit: Some(1), ..Default::default() };
        Ok(self.get_related(instance, relation, &opts).await?.into_iter().next())
    }

    async fn create_related(&self, instance: &Value, relation: &ResolvedRelation, mut values: Row) -> Result<Value, AppError> {
        let target = &relation.target;
        let owner_id = self.pk_of(instance);
        match relation.kind {
            RelationKind::HasOne | RelationKind::HasMany => {
                values.insert(relation.foreign_key.clone(), owner_id);
                let q = sql::insert(target, &values)?;
                fetch_optional(&self.pool, &q)
                    .await?
                    .ok_or_else(|| AppError::Db(sqlx::Error::RowNotFound))
            }
            RelationKind::BelongsTo => {
                let mut tx = self.pool.begin().await?;
                let created = fetch_optional(&mut *tx, &sql::insert(target, &values)?)
                    .await?
                    .ok_or_else(|| AppError::Db(sqlx::Error::RowNotFound))?;
                let link = sql::link_foreign_key(
                    &self.entity.table,
                    &relation.foreign_key,
                    &field(&created, &target.pk_column),
                    &owner_id,
                )?;
                execute(&mut *tx, &link).await?;
                tx.commit().await?;
                Ok(created)
            }
            RelationKind::BelongsToMany => {
                let mut tx = self.pool.begin().await?;
                let created = fetch_optional(&mut *tx, &sql::insert(target, &values)?)
                    .await?
                    .ok_or_else(|| AppError::Db(sqlx::Error::RowNotFound))?;
                let link = sql::link_through(&self.entity.table, relation, &owner_id, &field(&created, &target.pk_column))?;
                execute(&mut *tx, &link).await?;
                tx.commit().await?;
                Ok(created)
            }
        }
    }

    async fn add_related(
        &self,
        instance: &Value,
        relation: &ResolvedRelation,
        rel_id: &str,
    ) -> Result<Option<Value>, AppError> {
        let target = &relation.target;
        let target_id = parse_id(rel_id, &target.pk_type)?;
        let owner_id = self.pk_of(instance);
        match relation.kind {
            // Insert failures on a missing target surface as 23503 from the join table's FK.
            RelationKind::BelongsToMany => {
                let q = sql::link_through(&self.entity.table, relation, &owner_id, &target_id)?;
                fetch_optional(&self.pool, &q).await
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                let q = sql::link_foreign_key(target, &relation.foreign_key, &owner_id, &target_id)?;
                if let Some(row) = fetch_optional(&self.pool, &q).await? {
                    return Ok(Some(row));
                }
                self.ensure_exists(target, &target_id).await?;
                Ok(None)
            }
            RelationKind::BelongsTo => {
                self.ensure_exists(target, &target_id).await?;
                let q = sql::link_foreign_key(&self.entity.table, &relation.foreign_key, &target_id, &owner_id)?;
                fetch_optional(&self.pool, &q).await
            }
        }
    }

    async fn remove_related(&self, instance: &Value, relation: &ResolvedRelation, rel_id: &str) -> Result<u64, AppError> {
        let target = &relation.target;
        let target_id = parse_id(rel_id, &target.pk_type)?;
        let owner_id = self.pk_of(instance);
        let q = match relation.kind {
            RelationKind::BelongsToMany => sql::unlink_through(&self.entity.table, relation, &owner_id, &target_id)?,
            RelationKind::HasOne | RelationKind::HasMany => {
                sql::unlink_foreign_key(target, &relation.foreign_key, &owner_id, &target_id)?
            }
            RelationKind::BelongsTo => {
                sql::unlink_foreign_key(&self.entity.table, &relation.foreign_key, &target_id, &owner_id)?
            }
        };
        execute(&self.pool, &q).await
    }
}

impl PgModel {
    async fn ensure_exists(&self, table: &crate::config::TableRef, id: &Value) -> Result<(), AppError> {
        let q = sql::select_by_id(table, id)?;
        match fetch_optional(&self.pool, &q).await? {
            Some(_) => Ok(()),
            None => Err(AppError::ForeignKey(format!("{} {} does not exist", table.model_name, id))),
        }
    }
}

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n as f64) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
