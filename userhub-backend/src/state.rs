use std::sync::Arc;

use userhub_job_queue::QueueManager;

/// Shared application state passed to every route handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub queue: Arc<QueueManager>,
}

impl AppState {
    pub fn new(queue: Arc<QueueManager>) -> Self {
        Self { queue }
    }
}
