//! Storage backends for job queues.
//!
//! A backend owns durability, leasing and the retry/dead-letter policy. The queue
//! manager and worker loops only talk to it through these traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::JobQueueError;
use crate::types::{FailureDisposition, JobInstance, JobSnapshot, Lease, QueueCounts};

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use redis::RedisBackend;

/// A store that can open named queues.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Open (creating if needed) the queue stored under `name`.
    ///
    /// Fails with [`JobQueueError::Unavailable`] when the store cannot be reached.
    async fn open_queue(&self, name: &str) -> Result<Arc<dyn BackendQueue>, JobQueueError>;
}

/// Handle to one named queue inside a backend.
#[async_trait]
pub trait BackendQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Durably store a new job and return it once persisted.
    async fn push(&self, payload: Value) -> Result<JobInstance, JobQueueError>;

    /// Wait up to `wait` for the next leasable job.
    ///
    /// Returns `Ok(None)` when the window elapses without work. Implementations must
    /// suspend rather than spin while waiting.
    async fn lease(&self, wait: Duration) -> Result<Option<Lease>, JobQueueError>;

    /// Permanently remove a successfully handled job.
    async fn ack(&self, lease: &Lease) -> Result<(), JobQueueError>;

    /// Hand a failed job back to the backend retry policy.
    async fn fail(&self, lease: &Lease, error: &str) -> Result<FailureDisposition, JobQueueError>;

    /// Look up a stored job. Acked jobs are gone and return `None`.
    async fn get(&self, id: Uuid) -> Result<Option<JobSnapshot>, JobQueueError>;

    async fn counts(&self) -> Result<QueueCounts, JobQueueError>;
}

/// Wall-clock time `duration` from now, saturating on overflow.
#[inline]
pub(crate) fn utc_after(duration: Duration) -> chrono::DateTime<chrono::Utc> {
    let now = chrono::Utc::now();
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}
