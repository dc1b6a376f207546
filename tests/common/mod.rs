#![allow(dead_code)]

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use model_ctrl::{controller, load_from_str, model_routes, resolve, AppError, MemoryStore, Model, Row};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const MODELS: &str = r#"{"models": [
    {"name": "Users",
     "columns": [
        {"name": "id", "type": "serial"},
        {"name": "name", "type": "text", "nullable": false, "validate": {"required": true, "max_length": 20}},
        {"name": "email", "type": "text", "validate": {"format": "email"}},
        {"name": "meta", "type": "jsonb"},
        {"name": "created_at", "type": "timestamptz", "default": "now()"}
     ],
     "scopes": [
        {"name": "a_names", "where": {"name": {"$like": "A%"}}, "order": ["name", "desc"]}
     ],
     "relations": [
        {"name": "cars", "kind": "has_many", "target": "Cars", "foreign_key": "user_id"},
        {"name": "profile", "kind": "has_one", "target": "Profiles", "foreign_key": "user_id"},
        {"name": "groups", "kind": "belongs_to_many", "target": "Groups",
         "through": {"table": "user_groups", "source_key": "user_id", "target_key": "group_id"}}
     ],
     "public_instance_methods": ["rename", "unregistered"]},
    {"name": "Cars",
     "columns": [{"name": "id", "type": "serial"}, {"name": "model", "type": "text"}, {"name": "user_id", "type": "integer"}],
     "relations": [{"name": "owner", "kind": "belongs_to", "target": "Users", "foreign_key": "user_id"}]},
    {"name": "Profiles",
     "columns": [{"name": "id", "type": "serial"}, {"name": "bio", "type": "text"}, {"name": "user_id", "type": "integer"}]},
    {"name": "Groups",
     "columns": [{"name": "id", "type": "serial"}, {"name": "name", "type": "text"}],
     "relations": [{"name": "users", "kind": "belongs_to_many", "target": "Users",
         "through": {"table": "user_groups", "source_key": "group_id", "target_key": "user_id"}}]}
]}"#;

async fn rename(model: Arc<dyn Model>, instance: Value, args: Value) -> Result<Value, AppError> {
    let mut row = Row::new();
    row.insert("name".into(), args.get("name").cloned().unwrap_or(Value::Null));
    model.update(&instance, row).await
}

async fn hidden(_model: Arc<dyn Model>, instance: Value, _args: Value) -> Result<Value, AppError> {
    Ok(instance)
}

/// Every model mounted at its path segment over a fresh in-memory store.
pub fn app() -> Router {
    let model = resolve(&load_from_str(MODELS).unwrap()).unwrap();
    let (_store, models) = MemoryStore::models(&model);
    let controllers = models.into_iter().map(|m| {
        let ctrl = controller(m);
        if ctrl.path_segment() == "users" {
            ctrl.with_method("rename", rename).with_method("hidden", hidden)
        } else {
            ctrl
        }
    });
    model_routes(controllers).unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn message(&self) -> &str {
        self.body["error"]["message"].as_str().unwrap_or_default()
    }
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> TestResponse {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    TestResponse { status, headers, body }
}

pub async fn get(app: &Router, uri: &str) -> TestResponse {
    send(app, "GET", uri, None).await
}

pub async fn post(app: &Router, uri: &str, body: Value) -> TestResponse {
    send(app, "POST", uri, Some(body)).await
}

/// Create a row and return its id.
pub async fn seed(app: &Router, path: &str, body: Value) -> i64 {
    let res = post(app, path, body).await;
    assert_eq!(res.status, StatusCode::CREATED, "seeding {}: {:?}", path, res.body);
    res.body["id"].as_i64().unwrap()
}
