//! Job executor trait for implementing job handlers.

use async_trait::async_trait;

use crate::error::HandlerError;
use crate::types::JobInstance;

/// Trait for implementing job executors.
///
/// Each queue name is bound to exactly one executor. Delivery is at-least-once, so an
/// executor may see the same job more than once; `job.attempts` tells it how many times
/// the job has been leased.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Returns the job type (queue name) this executor handles.
    fn job_type(&self) -> &str;

    /// Execute the job.
    ///
    /// Returns `Ok(())` on success, or an error describing the failure.
    async fn execute(&self, job: &JobInstance) -> Result<(), HandlerError>;
}

/// A no-op executor that immediately completes jobs.
///
/// Useful for wiring tests or queues whose consumers live in another process.
#[derive(Debug, Default, Clone)]
pub struct NoOpExecutor {
    job_type: String,
}

impl NoOpExecutor {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
        }
    }
}

#[async_trait]
impl JobExecutor for NoOpExecutor {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn execute(&self, _job: &JobInstance) -> Result<(), HandlerError> {
        Ok(())
    }
}
