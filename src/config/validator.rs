//! Config validation: referential integrity between models, columns and relations.

use crate::case::{relation_key, to_snake_case};
use crate::config::{FullConfig, ModelConfig, RelationKind};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

/// Table name for a model: explicit `table`, else snake_case of its name.
pub fn table_name(model: &ModelConfig) -> String {
    model.table.clone().unwrap_or_else(|| to_snake_case(&model.name))
}

/// Mount path for a model: explicit `path_segment`, else snake_case of its name.
pub fn path_segment(model: &ModelConfig) -> String {
    model.path_segment.clone().unwrap_or_else(|| to_snake_case(&model.name))
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    if config.models.is_empty() {
        return Err(ConfigError::Validation("at least one model required".into()));
    }
    let mut names = HashSet::new();
    let mut paths = HashSet::new();
    for m in &config.models {
        if !names.insert(m.name.as_str()) {
            return Err(ConfigError::Duplicate { kind: "model", name: m.name.clone() });
        }
        if !paths.insert(path_segment(m)) {
            return Err(ConfigError::Duplicate { kind: "path segment", name: path_segment(m) });
        }
    }
    let models_by_name: HashMap<&str, &ModelConfig> = config.models.iter().map(|m| (m.name.as_str(), m)).collect();

    for m in &config.models {
        let columns: HashSet<&str> = m.columns.iter().map(|c| c.name.as_str()).collect();
        if columns.len() != m.columns.len() {
            return Err(ConfigError::Validation(format!("model {} has duplicate columns", m.name)));
        }
        if !columns.contains(m.primary_key.as_str()) {
            return Err(ConfigError::InvalidPrimaryKey {
                model: m.name.clone(),
                column: m.primary_key.clone(),
            });
        }

        for s in &m.scopes {
            if let Some(serde_json::Value::Object(filter)) = &s.where_ {
                for col in filter.keys() {
                    if !columns.contains(col.as_str()) {
                        return Err(ConfigError::MissingReference {
                            kind: "scope column",
                            id: format!("{}.{}", m.name, col),
                        });
                    }
                }
            } else if s.where_.as_ref().is_some_and(|w| !w.is_null()) {
                return Err(ConfigError::Validation(format!(
                    "scope {} on {}: where must be an object",
                    s.name, m.name
                )));
            }
        }

        let mut relation_names = HashSet::new();
        for r in &m.relations {
            if !relation_names.insert(relation_key(&r.name)) {
                return Err(ConfigError::Duplicate { kind: "relation", name: format!("{}.{}", m.name, r.name) });
            }
            let target = models_by_name.get(r.target.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "relation target",
                id: r.target.clone(),
            })?;
            let target_columns: HashSet<&str> = target.columns.iter().map(|c| c.name.as_str()).collect();
            match r.kind {
                RelationKind::BelongsTo => {
                    let fk = r.foreign_key.as_deref().ok_or_else(|| missing_fk(m, &r.name))?;
                    if !columns.contains(fk) {
                        return Err(ConfigError::MissingReference { kind: "column", id: format!("{}.{}", m.name, fk) });
                    }
                }
                RelationKind::HasOne | RelationKind::HasMany => {
                    let fk = r.foreign_key.as_deref().ok_or_else(|| missing_fk(m, &r.name))?;
                    if !target_columns.contains(fk) {
                        return Err(ConfigError::MissingReference {
                            kind: "column",
                            id: format!("{}.{}", target.name, fk),
                        });
                    }
                }
                RelationKind::BelongsToMany => {
                    if r.through.is_none() {
                        return Err(ConfigError::Validation(format!(
                            "relation {}.{} requires a through table",
                            m.name, r.name
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn missing_fk(model: &ModelConfig, relation: &str) -> ConfigError {
    ConfigError::Validation(format!("relation {}.{} requires foreign_key", model.name, relation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;

    const BASE: &str = r#"{"models": [
        {"name": "Users", "columns": [{"name": "id", "type": "serial"}, {"name": "first_name", "type": "text"}],
         "relations": [{"name": "cars", "kind": "has_many", "target": "Cars", "foreign_key": "user_id"}]},
        {"name": "Cars", "columns": [{"name": "id", "type": "serial"}, {"name": "user_id", "type": "integer"}]}
    ]}"#;

    #[test]
    fn accepts_consistent_config() {
        let config = load_from_str(BASE).unwrap();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn rejects_unknown_relation_target() {
        let config = load_from_str(&BASE.replace("\"target\": \"Cars\"", "\"target\": \"Boats\"")).unwrap();
        assert!(matches!(validate(&config), Err(ConfigError::MissingReference { kind: "relation target", .. })));
    }

    #[test]
    fn rejects_foreign_key_missing_on_target() {
        let config = load_from_str(&BASE.replace("\"foreign_key\": \"user_id\"", "\"foreign_key\": \"owner_id\"")).unwrap();
        assert!(matches!(validate(&config), Err(ConfigError::MissingReference { kind: "column", .. })));
    }

    #[test]
    fn rejects_missing_primary_key() {
        let config = load_from_str(&BASE.replace("{\"name\": \"id\", \"type\": \"serial\"}, {\"name\": \"user_id\"", "{\"name\": \"user_id\"")).unwrap();
        assert!(matches!(validate(&config), Err(ConfigError::InvalidPrimaryKey { .. })));
    }

    #[test]
    fn rejects_relations_that_differ_only_in_number() {
        let config = load_from_str(&BASE.replace(
            r#""foreign_key": "user_id"}]"#,
            r#""foreign_key": "user_id"}, {"name": "Car", "kind": "has_one", "target": "Cars", "foreign_key": "user_id"}]"#,
        ))
        .unwrap();
        assert!(matches!(validate(&config), Err(ConfigError::Duplicate { kind: "relation", .. })));
    }

    #[test]
    fn defaults_table_and_path_to_snake_case() {
        let config = load_from_str(r#"[{"name": "CarParts", "columns": [{"name": "id", "type": "serial"}]}]"#).unwrap();
        assert_eq!(table_name(&config.models[0]), "car_parts");
        assert_eq!(path_segment(&config.models[0]), "car_parts");
    }
}
