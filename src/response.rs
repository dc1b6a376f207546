//! Response bodies that are not model instances.

use serde::Serialize;

#[derive(Serialize)]
pub struct HealthBody {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ReadyBody {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'static str>,
}

#[derive(Serialize)]
pub struct VersionBody {
    pub name: &'static str,
    pub version: &'static str,
}

/// Same shape `AppError` renders, for responses produced outside a handler.
pub fn error_body(code: &str, message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "code": code,
            "message": message.into()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_omits_missing_database() {
        let body = serde_json::to_value(ReadyBody { status: "ok", database: None }).unwrap();
        assert_eq!(body, serde_json::json!({"status": "ok"}));
    }

    #[test]
    fn error_body_shape() {
        let body = error_body("not_found", "no route");
        assert_eq!(body["error"]["code"], "not_found");
        assert_eq!(body["error"]["message"], "no route");
    }
}
