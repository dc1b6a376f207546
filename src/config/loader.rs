//! Load model definitions from JSON and resolve them into runtime metadata.

use crate::config::resolved::{
    ColumnInfo, PkType, ResolvedEntity, ResolvedModel, ResolvedRelation, ResolvedScope, ResolvedThrough, TableRef,
};
use crate::config::types::*;
use crate::config::{path_segment, table_name, validate};
use crate::error::ConfigError;
use crate::query::{Direction, OrderBy, Where};
use std::collections::HashMap;
use std::path::Path;

/// Parse a config document: `{"models": [...]}` or a bare array of models.
pub fn load_from_str(s: &str) -> Result<FullConfig, ConfigError> {
    let value: serde_json::Value = serde_json::from_str(s).map_err(|e| ConfigError::Load(e.to_string()))?;
    let config = if value.is_array() {
        FullConfig {
            models: serde_json::from_value(value).map_err(|e| ConfigError::Load(e.to_string()))?,
        }
    } else {
        serde_json::from_value(value).map_err(|e| ConfigError::Load(e.to_string()))?
    };
    Ok(config)
}

pub async fn load_from_path(path: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let config = load_from_str(&text)?;
    tracing::info!(path = %path.display(), models = config.models.len(), "loaded model config");
    Ok(config)
}

/// Build resolved model from full config. Validates first.
pub fn resolve(config: &FullConfig) -> Result<ResolvedModel, ConfigError> {
    validate(config)?;

    let tables: HashMap<&str, TableRef> = config
        .models
        .iter()
        .map(|m| (m.name.as_str(), table_ref(m)))
        .collect();
    let rules: HashMap<&str, HashMap<String, ValidationRule>> = config
        .models
        .iter()
        .map(|m| (m.name.as_str(), validation_rules(m)))
        .collect();

    let mut entities = Vec::with_capacity(config.models.len());
    let mut entity_by_path = HashMap::new();
    let mut entity_by_name = HashMap::new();

    for m in &config.models {
        let table = tables[m.name.as_str()].clone();
        let relations = m
            .relations
            .iter()
            .map(|r| resolve_relation(m, r, &tables, &rules))
            .collect::<Result<Vec<_>, _>>()?;
        let scopes = m
            .scopes
            .iter()
            .map(|s| resolve_scope(m, s).map(|r| (s.name.clone(), r)))
            .collect::<Result<HashMap<_, _>, _>>()?;
        let validation = rules[m.name.as_str()].clone();

        let path = path_segment(m);
        entity_by_path.insert(path.clone(), entities.len());
        entity_by_name.insert(m.name.clone(), entities.len());
        entities.push(ResolvedEntity {
            table,
            path_segment: path,
            relations,
            scopes,
            public_methods: m.public_instance_methods.clone(),
            validation,
        });
    }

    Ok(ResolvedModel {
        entities,
        entity_by_path,
        entity_by_name,
    })
}

fn table_ref(m: &ModelConfig) -> TableRef {
    let columns: Vec<ColumnInfo> = m
        .columns
        .iter()
        .map(|c| {
            let pg_type = c.type_.trim().to_lowercase();
            ColumnInfo {
                name: c.name.clone(),
                cast: cast_type(&c.type_),
                is_json: pg_type == "json" || pg_type == "jsonb",
                pg_type,
                nullable: c.nullable && c.name != m.primary_key,
                has_default: c.default.is_some() || is_serial(&c.type_),
                default: c.default.clone(),
                is_pk: c.name == m.primary_key,
            }
        })
        .collect();
    let pk_type = columns
        .iter()
        .find(|c| c.is_pk)
        .map(|c| infer_pk_type(&c.pg_type))
        .unwrap_or(PkType::Text);
    TableRef {
        model_name: m.name.clone(),
        schema_name: m.schema.clone(),
        table_name: table_name(m),
        pk_column: m.primary_key.clone(),
        pk_type,
        columns,
    }
}

fn validation_rules(m: &ModelConfig) -> HashMap<String, ValidationRule> {
    m.columns
        .iter()
        .filter_map(|c| c.validate.clone().map(|v| (c.name.clone(), v)))
        .collect()
}

fn resolve_relation(
    owner: &ModelConfig,
    r: &RelationConfig,
    tables: &HashMap<&str, TableRef>,
    rules: &HashMap<&str, HashMap<String, ValidationRule>>,
) -> Result<ResolvedRelation, ConfigError> {
    let target = tables.get(r.target.as_str()).cloned().ok_or_else(|| ConfigError::MissingReference {
        kind: "relation target",
        id: r.target.clone(),
    })?;
    let through = r.through.as_ref().map(|t| ResolvedThrough {
        schema_name: t.schema.clone().unwrap_or_else(|| owner.schema.clone()),
        table_name: t.table.clone(),
        source_key: t.source_key.clone(),
        target_key: t.target_key.clone(),
    });
    Ok(ResolvedRelation {
        name: r.name.clone(),
        kind: r.kind,
        target,
        foreign_key: r.foreign_key.clone().unwrap_or_default(),
        through,
        validation: rules.get(r.target.as_str()).cloned().unwrap_or_default(),
    })
}

fn resolve_scope(m: &ModelConfig, s: &ScopeConfig) -> Result<ResolvedScope, ConfigError> {
    let invalid = |e: crate::error::AppError| ConfigError::Validation(format!("scope {}.{}: {}", m.name, s.name, e));
    let filter = match &s.where_ {
        Some(w) => Where::parse(w).map_err(invalid)?,
        None => Where::default(),
    };
    let order = match &s.order {
        None => None,
        Some(OrderConfig::Column(c)) => Some(OrderBy { column: c.clone(), direction: Direction::Asc }),
        Some(OrderConfig::Pair(c, d)) => Some(OrderBy { column: c.clone(), direction: Direction::parse(d).map_err(invalid)? }),
    };
    Ok(ResolvedScope {
        name: s.name.clone(),
        filter,
        attributes: s.attributes.clone(),
        order,
        limit: s.limit,
    })
}

fn is_serial(type_: &str) -> bool {
    type_.trim().to_lowercase().ends_with("serial")
}

/// Type used when casting bound text parameters. Serial pseudo-types cast to their integer type.
fn cast_type(type_: &str) -> String {
    let lower = type_.trim().to_lowercase();
    match lower.as_str() {
        "serial" | "serial4" => "integer".into(),
        "bigserial" | "serial8" => "bigint".into(),
        "smallserial" | "serial2" => "smallint".into(),
        // Schema-qualified custom types keep their original spelling.
        _ if type_.contains('.') => type_.trim().to_string(),
        _ => lower,
    }
}

fn infer_pk_type(type_lower: &str) -> PkType {
    if type_lower.contains("uuid") {
        PkType::Uuid
    } else if type_lower.contains("bigserial") || type_lower.contains("bigint") || type_lower == "serial8" {
        PkType::BigInt
    } else if type_lower.contains("serial") || type_lower.contains("int") {
        PkType::Int
    } else {
        PkType::Text
    }
}
