use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// GET /jobs/{jobName}/{jobId}
/// Jobs disappear once acked, so a completed job answers 404.
pub async fn get(
    Extension(state): Extension<Arc<AppState>>,
    Path(path): Path<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let job_name = path
        .get("jobName")
        .ok_or_else(|| ApiError::bad_request("missing jobName path parameter"))?;
    let job_id = path
        .get("jobId")
        .ok_or_else(|| ApiError::bad_request("missing jobId path parameter"))?;
    let id = Uuid::parse_str(job_id)
        .map_err(|_| ApiError::bad_request(format!("invalid job id: {job_id}")))?;

    let snapshot = state
        .queue
        .job(job_name, id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {id}")))?;

    Ok(Json(json!({
        "id": snapshot.job.id,
        "jobName": snapshot.job.queue,
        "state": snapshot.state.to_string(),
        "attempts": snapshot.job.attempts,
        "payload": snapshot.job.payload,
        "enqueuedAt": snapshot.job.enqueued_at.to_rfc3339(),
        "lastError": snapshot.last_error,
    })))
}
