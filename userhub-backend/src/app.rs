use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{jobs, status};
use crate::state::AppState;

// Job payloads are small JSON documents.
const DEFAULT_BODY_LIMIT: usize = 256 * 1024;

/// Build the axum router with the provided shared application state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(status::index))
        .route("/health", get(status::health))
        .route("/ready", get(status::ready))
        .route("/jobs/{jobName}", post(jobs::enqueue::enqueue))
        .route("/jobs/{jobName}/counts", get(jobs::counts::counts))
        .route("/jobs/{jobName}/{jobId}", get(jobs::get::get))
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
        .layer(Extension(state))
}
