//! Create the database objects a resolved model needs: schemas, tables, join tables, foreign keys.
//! Every statement is idempotent, so running it against an existing database only fills gaps.

use crate::config::{ColumnInfo, PkType, RelationKind, ResolvedModel, TableRef};
use crate::error::AppError;
use crate::sql::{qualified_table, quoted};
use sqlx::PgPool;
use std::collections::HashSet;

/// One DDL statement. `optional` statements may fail (constraint already present) without
/// aborting the run.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub optional: bool,
}

impl Statement {
    fn required(sql: String) -> Self {
        Statement { sql, optional: false }
    }

    fn optional(sql: String) -> Self {
        Statement { sql, optional: true }
    }
}

/// Declared type, quoting the parts of schema-qualified custom types.
fn type_sql(c: &ColumnInfo, pk_type: &PkType) -> String {
    if c.is_pk && c.default.is_none() {
        match (pk_type, c.pg_type.as_str()) {
            (PkType::Int, "integer" | "int" | "int4") => return "serial".into(),
            (PkType::BigInt, "bigint" | "int8") => return "bigserial".into(),
            _ => {}
        }
    }
    match c.pg_type.split_once('.') {
        Some((schema, name)) => qualified_table(schema, name),
        None => c.pg_type.clone(),
    }
}

fn column_sql(c: &ColumnInfo, pk_type: &PkType) -> String {
    let mut def = format!("{} {}", quoted(&c.name), type_sql(c, pk_type));
    if !c.nullable && !c.is_pk {
        def.push_str(" NOT NULL");
    }
    if let Some(d) = &c.default {
        def.push_str(" DEFAULT ");
        def.push_str(d);
    }
    def
}

fn create_table(t: &TableRef) -> String {
    let mut defs: Vec<String> = t.columns.iter().map(|c| column_sql(c, &t.pk_type)).collect();
    defs.push(format!("PRIMARY KEY ({})", quoted(&t.pk_column)));
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified_table(&t.schema_name, &t.table_name),
        defs.join(", ")
    )
}

fn pk_cast(t: &TableRef) -> &str {
    t.column(&t.pk_column).map(|c| c.cast.as_str()).unwrap_or("text")
}

fn add_foreign_key(from: &TableRef, column: &str, to: &TableRef) -> String {
    let name = format!("fk_{}_{}", from.table_name, column);
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        qualified_table(&from.schema_name, &from.table_name),
        quoted(&name),
        quoted(column),
        qualified_table(&to.schema_name, &to.table_name),
        quoted(&to.pk_column)
    )
}

/// Statements in dependency order: schemas, model tables, join tables, then foreign keys.
pub fn migration_statements(model: &ResolvedModel) -> Vec<Statement> {
    let mut out = Vec::new();
    let mut schemas = HashSet::new();
    let mut schema_stmt = |schema: &str, out: &mut Vec<Statement>| {
        if schemas.insert(schema.to_string()) {
            out.push(Statement::required(format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema))));
        }
    };

    for e in &model.entities {
        schema_stmt(&e.table.schema_name, &mut out);
        out.push(Statement::required(create_table(&e.table)));
    }

    let mut joins = HashSet::new();
    for e in &model.entities {
        for r in e.relations.iter().filter(|r| r.kind == RelationKind::BelongsToMany) {
            let Some(t) = &r.through else { continue };
            if !joins.insert((t.schema_name.clone(), t.table_name.clone())) {
                continue;
            }
            schema_stmt(&t.schema_name, &mut out);
            let owner = &e.table;
            let target = &r.target;
            out.push(Statement::required(format!(
                "CREATE TABLE IF NOT EXISTS {} ({} {} NOT NULL REFERENCES {} ({}) ON DELETE CASCADE, \
                 {} {} NOT NULL REFERENCES {} ({}) ON DELETE CASCADE, PRIMARY KEY ({}, {}))",
                qualified_table(&t.schema_name, &t.table_name),
                quoted(&t.source_key),
                pk_cast(owner),
                qualified_table(&owner.schema_name, &owner.table_name),
                quoted(&owner.pk_column),
                quoted(&t.target_key),
                pk_cast(target),
                qualified_table(&target.schema_name, &target.table_name),
                quoted(&target.pk_column),
                quoted(&t.source_key),
                quoted(&t.target_key),
            )));
        }
    }

    let mut fks = HashSet::new();
    for e in &model.entities {
        for r in &e.relations {
            let (from, to) = match r.kind {
                RelationKind::BelongsTo => (&e.table, &r.target),
                RelationKind::HasOne | RelationKind::HasMany => (&r.target, &e.table),
                RelationKind::BelongsToMany => continue,
            };
            let key = (from.schema_name.clone(), from.table_name.clone(), r.foreign_key.clone());
            if fks.insert(key) {
                out.push(Statement::optional(add_foreign_key(from, &r.foreign_key, to)));
            }
        }
    }
    out
}

/// Run `migration_statements` against the pool.
pub async fn apply_migrations(pool: &PgPool, model: &ResolvedModel) -> Result<(), AppError> {
    let statements = migration_statements(model);
    tracing::info!(count = statements.len(), "applying migrations");
    for s in &statements {
        tracing::debug!(sql = %s.sql, "migrate");
        match sqlx::query(&s.sql).execute(pool).await {
            Ok(_) => {}
            Err(e) if s.optional => tracing::debug!(error = %e, sql = %s.sql, "skipped"),
            Err(e) => return Err(AppError::from_db(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_from_str, resolve};

    const MODELS: &str = r#"[
        {"name": "Users", "columns": [
            {"name": "id", "type": "integer"},
            {"name": "email", "type": "text", "nullable": false},
            {"name": "created_at", "type": "timestamptz", "default": "now()"}
        ],
         "relations": [
            {"name": "cars", "kind": "has_many", "target": "Cars", "foreign_key": "user_id"},
            {"name": "groups", "kind": "belongs_to_many", "target": "Groups",
             "through": {"table": "user_groups", "source_key": "user_id", "target_key": "group_id"}}
         ]},
        {"name": "Cars", "schema": "fleet", "columns": [{"name": "id", "type": "bigserial"}, {"name": "user_id", "type": "integer"}],
         "relations": [{"name": "owner", "kind": "belongs_to", "target": "Users", "foreign_key": "user_id"}]},
        {"name": "Groups", "primary_key": "uid", "columns": [{"name": "uid", "type": "uuid", "default": "gen_random_uuid()"}],
         "relations": [{"name": "users", "kind": "belongs_to_many", "target": "Users",
             "through": {"table": "user_groups", "source_key": "group_id", "target_key": "user_id"}}]}
    ]"#;

    fn statements() -> Vec<Statement> {
        migration_statements(&resolve(&load_from_str(MODELS).unwrap()).unwrap())
    }

    #[test]
    fn schemas_then_tables() {
        let s = statements();
        assert_eq!(s[0].sql, r#"CREATE SCHEMA IF NOT EXISTS "public""#);
        assert_eq!(
            s[1].sql,
            r#"CREATE TABLE IF NOT EXISTS "public"."users" ("id" serial, "email" text NOT NULL, "created_at" timestamptz DEFAULT now(), PRIMARY KEY ("id"))"#
        );
        assert_eq!(s[2].sql, r#"CREATE SCHEMA IF NOT EXISTS "fleet""#);
        assert!(s[3].sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "fleet"."cars" ("id" bigserial"#));
        assert!(s.iter().all(|st| !st.sql.is_empty()));
    }

    #[test]
    fn join_table_created_once() {
        let joins: Vec<_> = statements()
            .into_iter()
            .filter(|s| s.sql.contains(r#""public"."user_groups""#))
            .collect();
        assert_eq!(joins.len(), 1);
        assert!(joins[0].sql.contains(r#""user_id" integer NOT NULL REFERENCES "public"."users" ("id") ON DELETE CASCADE"#));
        assert!(joins[0].sql.contains(r#""group_id" uuid NOT NULL REFERENCES "public"."groups" ("uid")"#));
        assert!(joins[0].sql.ends_with(r#"PRIMARY KEY ("user_id", "group_id"))"#));
    }

    #[test]
    fn foreign_keys_are_optional_and_deduplicated() {
        let fks: Vec<_> = statements().into_iter().filter(|s| s.optional).collect();
        assert_eq!(fks.len(), 1);
        assert_eq!(
            fks[0].sql,
            r#"ALTER TABLE "fleet"."cars" ADD CONSTRAINT "fk_cars_user_id" FOREIGN KEY ("user_id") REFERENCES "public"."users" ("id")"#
        );
    }
}
