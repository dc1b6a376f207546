//! Mount one controller per model at `/<path_segment>`.

use crate::controller::{controller, Controller};
use crate::error::{AppError, ConfigError};
use crate::model::Model;
use crate::response::error_body;
use axum::{http::StatusCode, response::IntoResponse, Json, Router};
use std::sync::Arc;

/// Controllers for models without custom instance methods.
pub fn controllers(models: Vec<Arc<dyn Model>>) -> Vec<Controller> {
    models.into_iter().map(controller).collect()
}

pub fn model_routes(controllers: impl IntoIterator<Item = Controller>) -> Result<Router, AppError> {
    let mut router = Router::new();
    let mut seen = std::collections::HashSet::new();
    for ctrl in controllers {
        let segment = ctrl.path_segment().to_string();
        if !seen.insert(segment.clone()) {
            return Err(ConfigError::Duplicate { kind: "path_segment", name: segment }.into());
        }
        tracing::debug!(model = %ctrl.model().name(), path = %segment, "mounting controller");
        router = router.nest(&format!("/{}", segment), ctrl.routes());
    }
    Ok(router.fallback(not_found))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(error_body("not_found", "no such route")))
}
