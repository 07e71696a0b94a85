//! Per-queue worker loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::backend::BackendQueue;
use crate::error::{HandlerError, JobQueueError};
use crate::executor::JobExecutor;
use crate::reporter::FailureReporter;
use crate::types::Lease;

/// Tuning knobs shared by every worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// How long one lease call may wait for work before the loop checks for shutdown.
    pub poll_interval: Duration,
    /// Pause after a backend error before leasing again.
    pub error_backoff: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Outcome of processing one leased job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Processed {
    Acked,
    Failed,
}

/// Consumer bound to one queue and its executor.
pub(crate) struct Worker {
    queue: Arc<dyn BackendQueue>,
    executor: Arc<dyn JobExecutor>,
    reporter: Arc<FailureReporter>,
    options: WorkerOptions,
}

impl Worker {
    pub(crate) fn new(
        queue: Arc<dyn BackendQueue>,
        executor: Arc<dyn JobExecutor>,
        reporter: Arc<FailureReporter>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            queue,
            executor,
            reporter,
            options,
        }
    }

    /// Lease and process jobs until `shutdown` is cancelled.
    ///
    /// Waiting for work is interrupted by shutdown; a job that is already running is
    /// finished first.
    pub(crate) async fn run(self, shutdown: CancellationToken) {
        let queue = self.queue.name().to_owned();
        tracing::info!(queue = %queue, "worker started");

        while !shutdown.is_cancelled() {
            // An abandoned wait is safe: anything popped but not handed back is requeued
            // by the backend after the lease timeout.
            let leased = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                leased = self.queue.lease(self.options.poll_interval) => leased,
            };
            let lease = match leased {
                Ok(Some(lease)) => lease,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(queue = %queue, error = %e, "failed to lease job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.options.error_backoff) => continue,
                    }
                }
            };

            if let Err(e) = self.process(lease).await {
                tracing::error!(queue = %queue, error = %e, "failed to settle job with backend");
            }
        }

        tracing::info!(queue = %queue, "worker stopped");
    }

    /// Run the executor for one lease and settle the job with the backend.
    pub(crate) async fn process(&self, lease: Lease) -> Result<Processed, JobQueueError> {
        let job = &lease.job;
        tracing::debug!(queue = %job.queue, job_id = %job.id, attempt = job.attempts, "processing job");

        let outcome = AssertUnwindSafe(self.executor.execute(job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))));

        match outcome {
            Ok(()) => {
                self.queue.ack(&lease).await?;
                tracing::debug!(queue = %job.queue, job_id = %job.id, "job completed");
                Ok(Processed::Acked)
            }
            Err(error) => {
                self.reporter.report(&job.meta(), &error).await;
                let disposition = self.queue.fail(&lease, &error.to_string()).await?;
                tracing::info!(
                    queue = %job.queue,
                    job_id = %job.id,
                    attempt = job.attempts,
                    disposition = %disposition,
                    "job failed"
                );
                Ok(Processed::Failed)
            }
        }
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
