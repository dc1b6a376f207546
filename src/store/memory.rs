//! `Model` over in-process tables. Used by the test suite and for prototyping without a database.
//! Enforces the same constraints the SQL schema from `apply_migrations` would: not-null columns,
//! foreign keys between related tables, and unique join rows.

use crate::config::{PkType, RelationKind, ResolvedEntity, ResolvedModel, ResolvedRelation, TableRef};
use crate::error::AppError;
use crate::model::{field, parse_id, FindOptions, Model, Row};
use crate::query::{compare_values, values_equal, Direction, Where};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A column in `from_table` that must point at an existing row of `to_table`.
#[derive(Clone, Debug)]
struct ForeignKey {
    from_table: String,
    column: String,
    to_table: String,
    to_column: String,
}

#[derive(Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

/// Shared storage for every model of one resolved config.
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    foreign_keys: Vec<ForeignKey>,
    join_tables: HashSet<String>,
}

fn table_key(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

fn key_of(t: &TableRef) -> String {
    table_key(&t.schema_name, &t.table_name)
}

impl MemoryStore {
    pub fn new(model: &ResolvedModel) -> Arc<Self> {
        let mut foreign_keys = Vec::new();
        let mut join_tables = HashSet::new();
        for e in &model.entities {
            for r in &e.relations {
                match r.kind {
                    RelationKind::BelongsTo => foreign_keys.push(ForeignKey {
                        from_table: key_of(&e.table),
                        column: r.foreign_key.clone(),
                        to_table: key_of(&r.target),
                        to_column: r.target.pk_column.clone(),
                    }),
                    RelationKind::HasOne | RelationKind::HasMany => foreign_keys.push(ForeignKey {
                        from_table: key_of(&r.target),
                        column: r.foreign_key.clone(),
                        to_table: key_of(&e.table),
                        to_column: e.table.pk_column.clone(),
                    }),
                    RelationKind::BelongsToMany => {
                        if let Some(t) = &r.through {
                            let join = table_key(&t.schema_name, &t.table_name);
                            join_tables.insert(join.clone());
                            foreign_keys.push(ForeignKey {
                                from_table: join.clone(),
                                column: t.source_key.clone(),
                                to_table: key_of(&e.table),
                                to_column: e.table.pk_column.clone(),
                            });
                            foreign_keys.push(ForeignKey {
                                from_table: join,
                                column: t.target_key.clone(),
                                to_table: key_of(&r.target),
                                to_column: r.target.pk_column.clone(),
                            });
                        }
                    }
                }
            }
        }
        foreign_keys.sort_by(|a, b| (&a.from_table, &a.column).cmp(&(&b.from_table, &b.column)));
        foreign_keys.dedup_by(|a, b| a.from_table == b.from_table && a.column == b.column);
        Arc::new(MemoryStore {
            tables: RwLock::new(HashMap::new()),
            foreign_keys,
            join_tables,
        })
    }

    /// One model per resolved entity over a fresh shared store.
    pub fn models(model: &ResolvedModel) -> (Arc<Self>, Vec<Arc<dyn Model>>) {
        let store = MemoryStore::new(model);
        let models = model
            .entities
            .iter()
            .map(|e| Arc::new(MemoryModel::new(store.clone(), e.clone())) as Arc<dyn Model>)
            .collect();
        (store, models)
    }
}

fn find_row<'a>(tables: &'a HashMap<String, Table>, table: &str, column: &str, value: &Value) -> Option<&'a Row> {
    tables
        .get(table)?
        .rows
        .iter()
        .find(|r| values_equal(r.get(column).unwrap_or(&Value::Null), value))
}

impl MemoryStore {
    /// Every non-null foreign key of `row` must resolve.
    fn check_outgoing(&self, tables: &HashMap<String, Table>, table: &str, row: &Row) -> Result<(), AppError> {
        for fk in self.foreign_keys.iter().filter(|fk| fk.from_table == table) {
            let v = row.get(&fk.column).unwrap_or(&Value::Null);
            if v.is_null() {
                continue;
            }
            if find_row(tables, &fk.to_table, &fk.to_column, v).is_none() {
                return Err(AppError::ForeignKey(format!(
                    "{}.{} = {} references a missing row of {}",
                    table, fk.column, v, fk.to_table
                )));
            }
        }
        Ok(())
    }

    /// Build a new row of `table` and check it without storing it. Returns the advanced sequence too.
    fn prepare_insert(&self, tables: &HashMap<String, Table>, table: &TableRef, values: &Row) -> Result<(Row, i64), AppError> {
        let key = key_of(table);
        let mut next_id = tables.get(&key).map(|t| t.next_id).unwrap_or(0);
        let row = build_row(table, values, &mut next_id)?;
        let pk = &table.pk_column;
        if find_row(tables, &key, pk, row.get(pk).unwrap_or(&Value::Null)).is_some() {
            return Err(AppError::Conflict(format!("duplicate key {} on {}", pk, key)));
        }
        self.check_outgoing(tables, &key, &row)?;
        Ok((row, next_id))
    }

    /// No row may still reference `row` when it is deleted. Join rows cascade.
    fn check_incoming(&self, tables: &mut HashMap<String, Table>, table: &str, row: &Row) -> Result<(), AppError> {
        let mut cascade = Vec::new();
        for fk in self.foreign_keys.iter().filter(|fk| fk.to_table == table) {
            let key = row.get(&fk.to_column).unwrap_or(&Value::Null);
            if find_row(tables, &fk.from_table, &fk.column, key).is_none() {
                continue;
            }
            if self.join_tables.contains(&fk.from_table) {
                cascade.push((fk.from_table.clone(), fk.column.clone(), key.clone()));
            } else {
                return Err(AppError::ForeignKey(format!(
                    "{} row is referenced by {}.{}",
                    table, fk.from_table, fk.column
                )));
            }
        }
        for (t, col, key) in cascade {
            if let Some(join) = tables.get_mut(&t) {
                join.rows.retain(|r| !values_equal(r.get(&col).unwrap_or(&Value::Null), &key));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryModel {
    store: Arc<MemoryStore>,
    entity: ResolvedEntity,
}

impl MemoryModel {
    pub fn new(store: Arc<MemoryStore>, entity: ResolvedEntity) -> Self {
        MemoryModel { store, entity }
    }

    fn key(&self) -> String {
        key_of(&self.entity.table)
    }

    fn pk_of(&self, instance: &Value) -> Value {
        field(instance, &self.entity.table.pk_column)
    }
}

/// Evaluate the few SQL defaults an in-memory row can reproduce.
fn default_value(expr: &str) -> Value {
    let e = expr.trim().to_lowercase();
    if e.starts_with("now") || e.starts_with("current_timestamp") {
        Value::String(chrono::Utc::now().to_rfc3339())
    } else if e.starts_with("gen_random_uuid") || e.starts_with("uuid_generate") {
        Value::String(uuid::Uuid::new_v4().to_string())
    } else if e == "true" || e == "false" {
        Value::Bool(e == "true")
    } else if let Ok(n) = e.parse::<i64>() {
        Value::Number(n.into())
    } else {
        Value::String(expr.trim().trim_matches('\'').to_string())
    }
}

/// Keep only known columns, fill defaults and generated keys, enforce not-null.
fn build_row(table: &TableRef, values: &Row, next_id: &mut i64) -> Result<Row, AppError> {
    let int_pk = matches!(table.pk_type, PkType::Int | PkType::BigInt);
    let mut row = Row::new();
    for c in &table.columns {
        let v = match values.get(&c.name) {
            Some(v) if !v.is_null() || !c.has_default => v.clone(),
            _ if c.is_pk && int_pk => {
                *next_id += 1;
                Value::Number((*next_id).into())
            }
            _ if c.is_pk && table.pk_type == PkType::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
            _ => c.default.as_deref().map(default_value).unwrap_or(Value::Null),
        };
        if v.is_null() && !c.nullable {
            return Err(AppError::Validation(format!("{} cannot be null", c.name)));
        }
        if c.is_pk && int_pk {
            if let Some(n) = v.as_i64() {
                *next_id = (*next_id).max(n);
            }
        }
        row.insert(c.name.clone(), v);
    }
    Ok(row)
}

fn insert_row(tables: &mut HashMap<String, Table>, table: &TableRef, row: Row, next_id: i64) {
    let t = tables.entry(key_of(table)).or_default();
    t.next_id = next_id;
    t.rows.push(row);
}

/// Apply `values` to a stored row: known non-key columns only, not-null enforced, `updated_at` touched.
fn apply_changes(table: &TableRef, mut row: Row, values: &Row) -> Result<Row, AppError> {
    for c in table.columns.iter().filter(|c| !c.is_pk) {
        if let Some(v) = values.get(&c.name) {
            if v.is_null() && !c.nullable {
                return Err(AppError::Validation(format!("{} cannot be null", c.name)));
            }
            row.insert(c.name.clone(), v.clone());
        }
    }
    if table.has_column("updated_at") && !values.contains_key("updated_at") {
        row.insert("updated_at".into(), Value::String(chrono::Utc::now().to_rfc3339()));
    }
    Ok(row)
}

fn replace_row(tables: &mut HashMap<String, Table>, table: &TableRef, id: &Value, row: Row) {
    if let Some(stored) = tables
        .get_mut(&key_of(table))
        .and_then(|t| t.rows.iter_mut().find(|r| values_equal(r.get(&table.pk_column).unwrap_or(&Value::Null), id)))
    {
        *stored = row;
    }
}

fn project(row: &Row, attributes: Option<&[String]>) -> Value {
    match attributes {
        Some(attrs) if !attrs.is_empty() => Value::Object(
            attrs
                .iter()
                .map(|a| (a.clone(), row.get(a).cloned().unwrap_or(Value::Null)))
                .collect(),
        ),
        _ => Value::Object(row.clone()),
    }
}

/// Filter, order (primary key by default), window and project rows.
fn select(table: &TableRef, rows: Vec<&Row>, opts: &FindOptions) -> Result<Vec<Value>, AppError> {
    opts.filter.check_columns(table)?;
    if let Some(attrs) = &opts.attributes {
        for a in attrs {
            if !table.has_column(a) {
                return Err(AppError::BadRequest(format!("unknown column '{}' on '{}'", a, table.model_name)));
            }
        }
    }
    let (order_col, direction) = match &opts.order {
        Some(o) if table.has_column(&o.column) => (o.column.as_str(), o.direction),
        Some(o) => return Err(AppError::BadRequest(format!("unknown column '{}' on '{}'", o.column, table.model_name))),
        None => (table.pk_column.as_str(), Direction::Asc),
    };
    let mut matched: Vec<&Row> = rows.into_iter().filter(|r| opts.filter.matches(r)).collect();
    matched.sort_by(|a, b| {
        let ord = compare_values(
            a.get(order_col).unwrap_or(&Value::Null),
            b.get(order_col).unwrap_or(&Value::Null),
        )
        .unwrap_or(Ordering::Equal);
        match direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    });
    let offset = opts.offset.unwrap_or(0) as usize;
    let limit = opts.limit.map(|n| n as usize).unwrap_or(usize::MAX);
    Ok(matched
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|r| project(r, opts.attributes.as_deref()))
        .collect())
}

#[async_trait]
impl Model for MemoryModel {
    fn entity(&self) -> &ResolvedEntity {
        &self.entity
    }

    async fn count(&self, filter: &Where) -> Result<u64, AppError> {
        filter.check_columns(&self.entity.table)?;
        let tables = self.store.tables.read().await;
        Ok(tables
            .get(&self.key())
            .map(|t| t.rows.iter().filter(|r| filter.matches(r)).count() as u64)
            .unwrap_or(0))
    }

    async fn find_all(&self, opts: &FindOptions) -> Result<Vec<Value>, AppError> {
        let tables = self.store.tables.read().await;
        let rows = tables.get(&self.key()).map(|t| t.rows.iter().collect()).unwrap_or_default();
        select(&self.entity.table, rows, opts)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>, AppError> {
        let id = parse_id(id, &self.entity.table.pk_type)?;
        let tables = self.store.tables.read().await;
        Ok(find_row(&tables, &self.key(), &self.entity.table.pk_column, &id).map(|r| Value::Object(r.clone())))
    }

    async fn create(&self, values: Row) -> Result<Value, AppError> {
        let mut tables = self.store.tables.write().await;
        let (row, next_id) = self.store.prepare_insert(&tables, &self.entity.table, &values)?;
        insert_row(&mut tables, &self.entity.table, row.clone(), next_id);
        Ok(Value::Object(row))
    }

    async fn update(&self, instance: &Value, values: Row) -> Result<Value, AppError> {
        let mut tables = self.store.tables.write().await;
        let table = &self.entity.table;
        let id = self.pk_of(instance);
        let current = self.current_row(&tables, &id)?;
        let updated = apply_changes(table, current, &values)?;
        self.store.check_outgoing(&tables, &self.key(), &updated)?;
        replace_row(&mut tables, table, &id, updated.clone());
        Ok(Value::Object(updated))
    }

    async fn destroy(&self, id: &str) -> Result<u64, AppError> {
        let id = parse_id(id, &self.entity.table.pk_type)?;
        let mut tables = self.store.tables.write().await;
        let key = self.key();
        let pk = &self.entity.table.pk_column;
        let Some(row) = find_row(&tables, &key, pk, &id).cloned() else {
            return Ok(0);
        };
        self.store.check_incoming(&mut tables, &key, &row)?;
        let Some(table) = tables.get_mut(&key) else { return Ok(0) };
        let before = table.rows.len();
        table.rows.retain(|r| !values_equal(r.get(pk).unwrap_or(&Value::Null), &id));
        Ok((before - table.rows.len()) as u64)
    }

    async fn get_related(
        &self,
        instance: &Value,
        relation: &ResolvedRelation,
        opts: &FindOptions,
    ) -> Result<Vec<Value>, AppError> {
        let target = &relation.target;
        let tables = self.store.tables.read().await;
        let target_rows: Vec<&Row> = tables.get(&key_of(target)).map(|t| t.rows.iter().collect()).unwrap_or_default();
        let linked: Vec<&Row> = match (relation.kind, &relation.through) {
            (RelationKind::BelongsToMany, Some(through)) => {
                let owner_id = self.pk_of(instance);
                let ids: Vec<Value> = tables
                    .get(&table_key(&through.schema_name, &through.table_name))
                    .map(|t| {
                        t.rows
                            .iter()
                            .filter(|r| values_equal(r.get(&through.source_key).unwrap_or(&Value::Null), &owner_id))
                            .map(|r| field(&Value::Object(r.clone()), &through.target_key))
                            .collect()
                    })
                    .unwrap_or_default();
                target_rows
                    .into_iter()
                    .filter(|r| ids.iter().any(|id| values_equal(r.get(&target.pk_column).unwrap_or(&Value::Null), id)))
                    .collect()
            }
            (RelationKind::BelongsTo, _) => {
                let fk = field(instance, &relation.foreign_key);
                target_rows
                    .into_iter()
                    .filter(|r| !fk.is_null() && values_equal(r.get(&target.pk_column).unwrap_or(&Value::Null), &fk))
                    .collect()
            }
            _ => {
                let owner_id = self.pk_of(instance);
                target_rows
                    .into_iter()
                    .filter(|r| values_equal(r.get(&relation.foreign_key).unwrap_or(&Value::Null), &owner_id))
                    .collect()
            }
        };
        select(target, linked, opts)
    }

    async fn get_one_related(&self, instance: &Value, relation: &ResolvedRelation) -> Result<Option<Value>, AppError> {
        let opts = FindOptions { limit: Some(1), ..Default::default() };
        Ok(self.get_related(instance, relation, &opts).await?.into_iter().next())
    }

    async fn create_related(&self, instance: &Value, relation: &ResolvedRelation, mut values: Row) -> Result<Value, AppError> {
        let target = MemoryModel::new(self.store.clone(), self.entity_for(&relation.target));
        let owner_id = self.pk_of(instance);
        match relation.kind {
            RelationKind::HasOne | RelationKind::HasMany => {
                values.insert(relation.foreign_key.clone(), owner_id);
                target.create(values).await
            }
            RelationKind::BelongsTo => {
                let mut tables = self.store.tables.write().await;
                let (created, next_id) = self.store.prepare_insert(&tables, &relation.target, &values)?;
                let mut link = Row::new();
                link.insert(
                    relation.foreign_key.clone(),
                    created.get(&relation.target.pk_column).cloned().unwrap_or(Value::Null),
                );
                let current = self.current_row(&tables, &owner_id)?;
                let updated = apply_changes(&self.entity.table, current, &link)?;
                // The new key only resolves once the target row is stored; check the rest first.
                let mut others = updated.clone();
                others.insert(relation.foreign_key.clone(), Value::Null);
                self.store.check_outgoing(&tables, &self.key(), &others)?;
                insert_row(&mut tables, &relation.target, created.clone(), next_id);
                replace_row(&mut tables, &self.entity.table, &owner_id, updated);
                Ok(Value::Object(created))
            }
            RelationKind::BelongsToMany => {
                let created = target.create(values).await?;
                let rel_id = field(&created, &relation.target.pk_column);
                self.insert_link(relation, &owner_id, &rel_id).await?;
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
            RelationKind::BelongsToMany => self.insert_link(relation, &owner_id, &target_id).await,
            RelationKind::HasOne | RelationKind::HasMany => {
                let mut tables = self.store.tables.write().await;
                let Some(row) = tables.get_mut(&key_of(target)).and_then(|t| {
                    t.rows
                        .iter_mut()
                        .find(|r| values_equal(r.get(&target.pk_column).unwrap_or(&Value::Null), &target_id))
                }) else {
                    return Err(AppError::ForeignKey(format!("{} {} does not exist", target.model_name, target_id)));
                };
                if values_equal(row.get(&relation.foreign_key).unwrap_or(&Value::Null), &owner_id) {
                    return Ok(None);
                }
                row.insert(relation.foreign_key.clone(), owner_id);
                Ok(Some(Value::Object(row.clone())))
            }
            RelationKind::BelongsTo => {
                {
                    let tables = self.store.tables.read().await;
                    if find_row(&tables, &key_of(target), &target.pk_column, &target_id).is_none() {
                        return Err(AppError::ForeignKey(format!("{} {} does not exist", target.model_name, target_id)));
                    }
                }
                if values_equal(&field(instance, &relation.foreign_key), &target_id) {
                    return Ok(None);
                }
                let mut link = Row::new();
                link.insert(relation.foreign_key.clone(), target_id);
                self.update(instance, link).await.map(Some)
            }
        }
    }

    async fn remove_related(&self, instance: &Value, relation: &ResolvedRelation, rel_id: &str) -> Result<u64, AppError> {
        let target = &relation.target;
        let target_id = parse_id(rel_id, &target.pk_type)?;
        let owner_id = self.pk_of(instance);
        let mut tables = self.store.tables.write().await;
        let (table, key_col, key, fk_col, fk) = match (relation.kind, &relation.through) {
            (RelationKind::BelongsToMany, Some(t)) => {
                let join = table_key(&t.schema_name, &t.table_name);
                let Some(table) = tables.get_mut(&join) else { return Ok(0) };
                let before = table.rows.len();
                table.rows.retain(|r| {
                    !(values_equal(r.get(&t.source_key).unwrap_or(&Value::Null), &owner_id)
                        && values_equal(r.get(&t.target_key).unwrap_or(&Value::Null), &target_id))
                });
                return Ok((before - table.rows.len()) as u64);
            }
            (RelationKind::BelongsTo, _) => (
                self.key(),
                self.entity.table.pk_column.clone(),
                owner_id,
                relation.foreign_key.clone(),
                target_id,
            ),
            _ => (key_of(target), target.pk_column.clone(), target_id, relation.foreign_key.clone(), owner_id),
        };
        let fk_table = if relation.kind == RelationKind::BelongsTo { &self.entity.table } else { target };
        let nullable = fk_table.column(&fk_col).map_or(true, |c| c.nullable);
        let mut removed = 0;
        if let Some(t) = tables.get_mut(&table) {
            for r in t.rows.iter_mut() {
                if values_equal(r.get(&key_col).unwrap_or(&Value::Null), &key)
                    && values_equal(r.get(&fk_col).unwrap_or(&Value::Null), &fk)
                {
                    if !nullable {
                        return Err(AppError::Validation(format!("{} cannot be null", fk_col)));
                    }
                    r.insert(fk_col.clone(), Value::Null);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

impl MemoryModel {
    fn current_row(&self, tables: &HashMap<String, Table>, id: &Value) -> Result<Row, AppError> {
        let table = &self.entity.table;
        find_row(tables, &self.key(), &table.pk_column, id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Instance of '{}' Not Found", table.model_name)))
    }

    /// A bare entity for a relation target, enough to create rows in its table.
    fn entity_for(&self, target: &TableRef) -> ResolvedEntity {
        ResolvedEntity {
            table: target.clone(),
            path_segment: target.table_name.clone(),
            relations: Vec::new(),
            scopes: HashMap::new(),
            public_methods: Vec::new(),
            validation: HashMap::new(),
        }
    }

    async fn insert_link(&self, relation: &ResolvedRelation, owner_id: &Value, target_id: &Value) -> Result<Option<Value>, AppError> {
        let through = relation
            .through
            .as_ref()
            .ok_or_else(|| AppError::BadRequest(format!("relation '{}' has no join table", relation.name)))?;
        let join = table_key(&through.schema_name, &through.table_name);
        let mut tables = self.store.tables.write().await;
        let exists = tables.get(&join).is_some_and(|t| {
            t.rows.iter().any(|r| {
                values_equal(r.get(&through.source_key).unwrap_or(&Value::Null), owner_id)
                    && values_equal(r.get(&through.target_key).unwrap_or(&Value::Null), target_id)
            })
        });
        if exists {
            return Ok(None);
        }
        let mut row = Row::new();
        row.insert(through.source_key.clone(), owner_id.clone());
        row.insert(through.target_key.clone(), target_id.clone());
        self.store.check_outgoing(&tables, &join, &row)?;
        tables.entry(join).or_default().rows.push(row.clone());
        Ok(Some(Value::Object(row)))
    }
}
