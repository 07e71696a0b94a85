use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::Json;
use serde_json::{json, Value};

use crate::{error::ApiError, state::AppState};

/// GET /jobs/{jobName}/counts
pub async fn counts(
    Extension(state): Extension<Arc<AppState>>,
    Path(path): Path<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let job_name = path
        .get("jobName")
        .ok_or_else(|| ApiError::bad_request("missing jobName path parameter"))?;

    let counts = state.queue.counts(job_name).await?;

    Ok(Json(json!({
        "jobName": job_name,
        "waiting": counts.waiting,
        "active": counts.active,
        "delayed": counts.delayed,
        "failed": counts.failed,
    })))
}
