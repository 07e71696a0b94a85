use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::{error::ApiError, state::AppState};

/// POST /jobs/{jobName}
/// Enqueue the request body as the payload of a new job.
pub async fn enqueue(
    Extension(state): Extension<Arc<AppState>>,
    Path(path): Path<HashMap<String, String>>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let job_name = path
        .get("jobName")
        .ok_or_else(|| ApiError::bad_request("missing jobName path parameter"))?;

    if !payload.is_object() {
        return Err(ApiError::bad_request("job payload must be a JSON object"));
    }

    let job = state.queue.enqueue(job_name, payload).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "id": job.id,
            "jobName": job.queue,
            "enqueuedAt": job.enqueued_at.to_rfc3339(),
        })),
    ))
}
