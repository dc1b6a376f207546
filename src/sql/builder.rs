//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE and relation queries from resolved
//! tables. Identifiers come from config only; request-supplied column names are checked against
//! the table before they reach SQL.

use crate::config::{ColumnInfo, ResolvedRelation, TableRef};
use crate::error::AppError;
use crate::model::Row;
use crate::query::{Condition, FindOptions, Op, OrderBy, Where};
use crate::sql::PgBindValue;
use serde_json::Value;

const MAIN_ALIAS: &str = "main";
const JOIN_ALIAS: &str = "link";

/// Quote identifier for PostgreSQL (safe: only from config).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

fn table_sql(table: &TableRef) -> String {
    qualified_table(&table.schema_name, &table.table_name)
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    /// Push a value for `col` and return its placeholder with the column cast.
    fn push(&mut self, v: &Value, col: &ColumnInfo) -> String {
        self.params.push(PgBindValue::from_json(v, col.is_json));
        format!("${}::{}", self.params.len(), col.cast)
    }

    fn push_cast(&mut self, v: &Value, cast: &str) -> String {
        self.params.push(PgBindValue::from_json(v, false));
        format!("${}::{}", self.params.len(), cast)
    }

    fn push_text(&mut self, s: String) -> String {
        self.params.push(PgBindValue::text(s));
        format!("${}", self.params.len())
    }
}

fn column<'a>(table: &'a TableRef, name: &str) -> Result<&'a ColumnInfo, AppError> {
    table
        .column(name)
        .ok_or_else(|| AppError::BadRequest(format!("unknown column '{}' on '{}'", name, table.model_name)))
}

/// SELECT list: numeric and custom enum (schema.typename) columns as ::text so rows decode as strings.
fn select_column_list(table: &TableRef, attributes: Option<&[String]>, alias: Option<&str>) -> Result<String, AppError> {
    let prefix = alias.map(|a| format!("{}.", a)).unwrap_or_default();
    let render = |c: &ColumnInfo| {
        let q = quoted(&c.name);
        if c.cast == "numeric" || c.cast.starts_with("numeric(") || c.cast.contains('.') {
            format!("{}{}::text AS {}", prefix, q, q)
        } else if alias.is_some() {
            format!("{}{} AS {}", prefix, q, q)
        } else {
            q
        }
    };
    match attributes {
        Some(attrs) if !attrs.is_empty() => Ok(attrs
            .iter()
            .map(|a| column(table, a).map(&render))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ")),
        _ => Ok(table.columns.iter().map(render).collect::<Vec<_>>().join(", ")),
    }
}

fn condition_sql(q: &mut QueryBuf, table: &TableRef, c: &Condition, prefix: &str) -> Result<String, AppError> {
    let col = column(table, &c.column)?;
    let lhs = format!("{}{}", prefix, quoted(&c.column));
    Ok(match (c.op, &c.value) {
        (Op::Eq | Op::Is, Value::Null) => format!("{} IS NULL", lhs),
        (Op::Ne, Value::Null) => format!("{} IS NOT NULL", lhs),
        (Op::Is, Value::Bool(true)) => format!("{} IS TRUE", lhs),
        (Op::Is, Value::Bool(false)) => format!("{} IS FALSE", lhs),
        (Op::Is, _) => return Err(AppError::BadRequest(format!("'is' on '{}' takes null, true or false", c.column))),
        (Op::In | Op::NotIn, Value::Array(items)) => {
            let negate = c.op == Op::NotIn;
            if items.is_empty() {
                return Ok(if negate { "TRUE".into() } else { "FALSE".into() });
            }
            let placeholders: Vec<String> = items.iter().map(|v| q.push(v, col)).collect();
            format!("{} {}IN ({})", lhs, if negate { "NOT " } else { "" }, placeholders.join(", "))
        }
        (Op::In | Op::NotIn, _) => return Err(AppError::BadRequest(format!("'in' on '{}' needs an array", c.column))),
        (Op::Like, v) => {
            let pattern = v.as_str().map(String::from).unwrap_or_else(|| v.to_string());
            format!("{}::text LIKE {}", lhs, q.push_text(pattern))
        }
        (op, v) => {
            let sym = match op {
                Op::Eq => "=",
                Op::Ne => "<>",
                Op::Gt => ">",
                Op::Gte => ">=",
                Op::Lt => "<",
                _ => "<=",
            };
            format!("{} {} {}", lhs, sym, q.push(v, col))
        }
    })
}

fn push_filter(
    q: &mut QueryBuf,
    table: &TableRef,
    filter: &Where,
    alias: &str,
    parts: &mut Vec<String>,
) -> Result<(), AppError> {
    let prefix = format!("{}.", alias);
    for c in filter.conditions() {
        parts.push(condition_sql(q, table, c, &prefix)?);
    }
    Ok(())
}

fn where_clause(parts: &[String]) -> String {
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

/// ORDER BY the requested column, else the primary key.
fn order_clause(table: &TableRef, order: Option<&OrderBy>, alias: &str) -> Result<String, AppError> {
    Ok(match order {
        Some(o) => {
            column(table, &o.column)?;
            format!(" ORDER BY {}.{} {}", alias, quoted(&o.column), o.direction.as_sql())
        }
        None => format!(" ORDER BY {}.{}", alias, quoted(&table.pk_column)),
    })
}

fn window_clause(opts: &FindOptions) -> String {
    let limit = opts.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset = opts.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    format!("{}{}", limit, offset)
}

/// SELECT with filters, projection, order and window.
pub fn select_list(table: &TableRef, opts: &FindOptions) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let cols = select_column_list(table, opts.attributes.as_deref(), Some(MAIN_ALIAS))?;
    let mut parts = Vec::new();
    push_filter(&mut q, table, &opts.filter, MAIN_ALIAS, &mut parts)?;
    q.sql = format!(
        "SELECT {} FROM {} {}{}{}{}",
        cols,
        table_sql(table),
        MAIN_ALIAS,
        where_clause(&parts),
        order_clause(table, opts.order.as_ref(), MAIN_ALIAS)?,
        window_clause(opts)
    );
    Ok(q)
}

pub fn count(table: &TableRef, filter: &Where) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let mut parts = Vec::new();
    push_filter(&mut q, table, filter, MAIN_ALIAS, &mut parts)?;
    q.sql = format!("SELECT COUNT(*) FROM {} {}{}", table_sql(table), MAIN_ALIAS, where_clause(&parts));
    Ok(q)
}

/// SELECT by primary key.
pub fn select_by_id(table: &TableRef, id: &Value) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let pk = column(table, &table.pk_column)?;
    let ph = q.push(id, pk);
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        select_column_list(table, None, None)?,
        table_sql(table),
        quoted(&pk.name),
        ph
    );
    Ok(q)
}

/// INSERT the body's known columns; omitted columns take their DB default.
pub fn insert(table: &TableRef, body: &Row) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &table.columns {
        let Some(v) = body.get(&c.name) else { continue };
        cols.push(quoted(&c.name));
        placeholders.push(q.push(v, c));
    }
    let returning = select_column_list(table, None, None)?;
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table_sql(table), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table_sql(table),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    Ok(q)
}

/// UPDATE by id: SET only known, non-key columns present in body; bumps `updated_at` when the table has one.
pub fn update(table: &TableRef, id: &Value, body: &Row) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for c in &table.columns {
        if c.is_pk {
            continue;
        }
        let Some(v) = body.get(&c.name) else { continue };
        let ph = q.push(v, c);
        sets.push(format!("{} = {}", quoted(&c.name), ph));
    }
    if sets.is_empty() {
        return select_by_id(table, id);
    }
    if table.has_column("updated_at") && !body.contains_key("updated_at") {
        sets.push(format!("{} = NOW()", quoted("updated_at")));
    }
    let pk = column(table, &table.pk_column)?;
    let id_ph = q.push(id, pk);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        table_sql(table),
        sets.join(", "),
        quoted(&pk.name),
        id_ph,
        select_column_list(table, None, None)?
    );
    Ok(q)
}

/// DELETE by id.
pub fn delete(table: &TableRef, id: &Value) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let pk = column(table, &table.pk_column)?;
    let ph = q.push(id, pk);
    q.sql = format!("DELETE FROM {} WHERE {} = {}", table_sql(table), quoted(&pk.name), ph);
    Ok(q)
}

/// SELECT target rows of `relation` linked to `owner_key`: the owner's primary key for
/// has_one/has_many/belongs_to_many, the owner's foreign key value for belongs_to.
pub fn select_related(
    owner: &TableRef,
    relation: &ResolvedRelation,
    owner_key: &Value,
    opts: &FindOptions,
) -> Result<QueryBuf, AppError> {
    let target = &relation.target;
    let mut q = QueryBuf::new();
    let cols = select_column_list(target, opts.attributes.as_deref(), Some(MAIN_ALIAS))?;
    let mut join = String::new();
    let mut parts = Vec::new();
    match &relation.through {
        Some(through) => {
            let owner_pk = column(owner, &owner.pk_column)?;
            join = format!(
                " JOIN {} {} ON {}.{} = {}.{}",
                qualified_table(&through.schema_name, &through.table_name),
                JOIN_ALIAS,
                JOIN_ALIAS,
                quoted(&through.target_key),
                MAIN_ALIAS,
                quoted(&target.pk_column)
            );
            let ph = q.push_cast(owner_key, &owner_pk.cast);
            parts.push(format!("{}.{} = {}", JOIN_ALIAS, quoted(&through.source_key), ph));
        }
        None => {
            let key_column = if relation.kind == crate::config::RelationKind::BelongsTo {
                &target.pk_column
            } else {
                &relation.foreign_key
            };
            let col = column(target, key_column)?;
            let ph = q.push(owner_key, col);
            parts.push(format!("{}.{} = {}", MAIN_ALIAS, quoted(key_column), ph));
        }
    }
    push_filter(&mut q, target, &opts.filter, MAIN_ALIAS, &mut parts)?;
    q.sql = format!(
        "SELECT {} FROM {} {}{}{}{}{}",
        cols,
        table_sql(target),
        MAIN_ALIAS,
        join,
        where_clause(&parts),
        order_clause(target, opts.order.as_ref(), MAIN_ALIAS)?,
        window_clause(opts)
    );
    Ok(q)
}

/// INSERT a join row; nothing is returned when the link already exists.
pub fn link_through(owner: &TableRef, relation: &ResolvedRelation, owner_id: &Value, target_id: &Value) -> Result<QueryBuf, AppError> {
    let through = relation
        .through
        .as_ref()
        .ok_or_else(|| AppError::BadRequest(format!("relation '{}' has no join table", relation.name)))?;
    let mut q = QueryBuf::new();
    let source_cast = &column(owner, &owner.pk_column)?.cast;
    let target_cast = &column(&relation.target, &relation.target.pk_column)?.cast;
    let s = q.push_cast(owner_id, source_cast);
    let t = q.push_cast(target_id, target_cast);
    let (sk, tk) = (quoted(&through.source_key), quoted(&through.target_key));
    q.sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({}, {}) ON CONFLICT DO NOTHING RETURNING {}, {}",
        qualified_table(&through.schema_name, &through.table_name),
        sk,
        tk,
        s,
        t,
        sk,
        tk
    );
    Ok(q)
}

/// DELETE a join row.
pub fn unlink_through(owner: &TableRef, relation: &ResolvedRelation, owner_id: &Value, target_id: &Value) -> Result<QueryBuf, AppError> {
    let through = relation
        .through
        .as_ref()
        .ok_or_else(|| AppError::BadRequest(format!("relation '{}' has no join table", relation.name)))?;
    let mut q = QueryBuf::new();
    let source_cast = &column(owner, &owner.pk_column)?.cast;
    let target_cast = &column(&relation.target, &relation.target.pk_column)?.cast;
    let s = q.push_cast(owner_id, source_cast);
    let t = q.push_cast(target_id, target_cast);
    q.sql = format!(
        "DELETE FROM {} WHERE {} = {} AND {} = {}",
        qualified_table(&through.schema_name, &through.table_name),
        quoted(&through.source_key),
        s,
        quoted(&through.target_key),
        t
    );
    Ok(q)
}

/// Point `table.fk` of row `row_id` at `fk_value`; returns nothing when it already does.
pub fn link_foreign_key(table: &TableRef, fk: &str, fk_value: &Value, row_id: &Value) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let fk_col = column(table, fk)?;
    let pk = column(table, &table.pk_column)?;
    let v = q.push(fk_value, fk_col);
    let id = q.push(row_id, pk);
    q.sql = format!(
        "UPDATE {} SET {} = {} WHERE {} = {} AND {} IS DISTINCT FROM {} RETURNING {}",
        table_sql(table),
        quoted(fk),
        v,
        quoted(&pk.name),
        id,
        quoted(fk),
        v,
        select_column_list(table, None, None)?
    );
    Ok(q)
}

/// Clear `table.fk` of row `row_id` when it currently equals `fk_value`.
pub fn unlink_foreign_key(table: &TableRef, fk: &str, fk_value: &Value, row_id: &Value) -> Result<QueryBuf, AppError> {
    let mut q = QueryBuf::new();
    let fk_col = column(table, fk)?;
    let pk = column(table, &table.pk_column)?;
    let id = q.push(row_id, pk);
    let v = q.push(fk_value, fk_col);
    q.sql = format!(
        "UPDATE {} SET {} = NULL WHERE {} = {} AND {} = {}",
        table_sql(table),
        quoted(fk),
        quoted(&pk.name),
        id,
        quoted(fk),
        v
    );
    Ok(q)
}
