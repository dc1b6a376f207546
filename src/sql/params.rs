//! Convert serde_json::Value into bind parameters.
//!
//! Every parameter is sent as text and cast in SQL (`$1::integer`, `$2::jsonb`), so one
//! parameter type covers all column types and PostgreSQL does the conversion.

use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct PgBindValue(pub Option<String>);

impl PgBindValue {
    /// JSON columns take the serialized document, other columns the scalar's text form.
    pub fn from_json(v: &Value, is_json: bool) -> Self {
        if is_json {
            return match v {
                Value::Null => PgBindValue(None),
                other => PgBindValue(Some(other.to_string())),
            };
        }
        PgBindValue(match v {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Array(_) | Value::Object(_) => Some(v.to_string()),
        })
    }

    pub fn text(s: impl Into<String>) -> Self {
        PgBindValue(Some(s.into()))
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_bind_as_text() {
        assert_eq!(PgBindValue::from_json(&json!(5), false).as_deref(), Some("5"));
        assert_eq!(PgBindValue::from_json(&json!(true), false).as_deref(), Some("true"));
        assert_eq!(PgBindValue::from_json(&json!("red"), false).as_deref(), Some("red"));
        assert_eq!(PgBindValue::from_json(&Value::Null, false), PgBindValue(None));
    }

    #[test]
    fn json_columns_bind_serialized() {
        assert_eq!(PgBindValue::from_json(&json!("red"), true).as_deref(), Some("\"red\""));
        assert_eq!(PgBindValue::from_json(&json!({"a": 1}), true).as_deref(), Some("{\"a\":1}"));
        assert_eq!(PgBindValue::from_json(&Value::Null, true), PgBindValue(None));
    }
}
