use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use sluice_core::PipelineRequest;

use crate::state::AppState;

/// Accepts one pipeline request and runs it to completion. The response
/// carries no error detail; failure kinds are only logged.
pub async fn run_pipeline(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<PipelineRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::error!("request decode failed: {rejection}");
            return internal_error();
        }
    };

    match app_state.pipeline.run(request).await {
        Ok(()) => (StatusCode::OK, Json(json!({}))),
        Err(err) => {
            tracing::error!("pipeline failed: {err}");
            internal_error()
        }
    }
}

fn internal_error() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal Server Error"})),
    )
}
