use std::sync::Arc;

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /
pub async fn index() -> Json<Value> {
    Json(json!({ "status": "on-line" }))
}

/// GET /health
/// Liveness: always 200 while the process is alive.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /ready
/// Readiness: every job queue must be reachable.
pub async fn ready(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    for name in state.queue.job_names() {
        if let Err(e) = state.queue.counts(name).await {
            tracing::warn!(queue = %name, error = %e, "queue backend not ready");
            return (StatusCode::SERVICE_UNAVAILABLE, "queue backend unavailable");
        }
    }
    (StatusCode::OK, "OK")
}
