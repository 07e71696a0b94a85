//! Failure reporting for job handlers.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use userhub_error_tracking::{ErrorEvent, ErrorTracker};

use crate::error::HandlerError;
use crate::types::JobMeta;

/// Records handler failures in the log and forwards them to the error-tracking sink.
///
/// The sink always receives the failure. The log entry is only written when
/// `log_failures` is set, which the binary enables for development environments.
#[derive(Clone)]
pub struct FailureReporter {
    tracker: Arc<dyn ErrorTracker>,
    log_failures: bool,
}

impl fmt::Debug for FailureReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureReporter")
            .field("tracker", &"<dyn ErrorTracker>")
            .field("log_failures", &self.log_failures)
            .finish()
    }
}

impl FailureReporter {
    pub fn new(tracker: Arc<dyn ErrorTracker>, log_failures: bool) -> Self {
        Self {
            tracker,
            log_failures,
        }
    }

    #[inline]
    pub fn logs_failures(&self) -> bool {
        self.log_failures
    }

    /// Report one handler failure. Never fails and never panics.
    pub async fn report(&self, meta: &JobMeta, error: &HandlerError) {
        if self.log_failures {
            tracing::error!(
                queue = %meta.queue,
                job_id = %meta.id,
                attempt = meta.attempts,
                kind = error.kind(),
                error = %error,
                "Queue {}: FAILED",
                meta.queue
            );
        }

        let event = ErrorEvent::new(error.kind(), error.to_string())
            .with_tag("queue", &meta.queue)
            .with_tag("job_id", meta.id)
            .with_tag("attempt", meta.attempts)
            .with_extra("enqueued_at", serde_json::json!(meta.enqueued_at.to_rfc3339()));

        match AssertUnwindSafe(self.tracker.capture_exception(event))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(queue = %meta.queue, job_id = %meta.id, error = %e, "failed to report job failure");
            }
            Err(_) => {
                tracing::warn!(queue = %meta.queue, job_id = %meta.id, "error tracker panicked while reporting job failure");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use userhub_error_tracking::TrackingError;

    use crate::types::JobInstance;

    #[derive(Default)]
    struct RecordingTracker {
        events: Mutex<Vec<ErrorEvent>>,
    }

    #[async_trait]
    impl ErrorTracker for RecordingTracker {
        async fn capture_exception(&self, event: ErrorEvent) -> Result<(), TrackingError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct BrokenTracker;

    #[async_trait]
    impl ErrorTracker for BrokenTracker {
        async fn capture_exception(&self, _event: ErrorEvent) -> Result<(), TrackingError> {
            Err(TrackingError::Transport("connection refused".into()))
        }
    }

    struct PanickingTracker;

    #[async_trait]
    impl ErrorTracker for PanickingTracker {
        async fn capture_exception(&self, _event: ErrorEvent) -> Result<(), TrackingError> {
            panic!("tracker exploded")
        }
    }

    fn meta() -> JobMeta {
        let mut job = JobInstance::new("UpdateUserMail", serde_json::json!({}));
        job.attempts = 2;
        job.meta()
    }

    #[tokio::test]
    async fn test_report_forwards_event_with_job_tags() {
        let tracker = Arc::new(RecordingTracker::default());
        let reporter = FailureReporter::new(tracker.clone(), false);
        let meta = meta();

        reporter
            .report(&meta, &HandlerError::failed("NetworkError: connection reset"))
            .await;

        let events = tracker.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.exception_type, "HandlerFailure");
        assert_eq!(event.message, "NetworkError: connection reset");
        assert_eq!(event.tags["queue"], "UpdateUserMail");
        assert_eq!(event.tags["job_id"], meta.id.to_string());
        assert_eq!(event.tags["attempt"], "2");
    }

    #[tokio::test]
    async fn test_report_swallows_tracker_errors() {
        let reporter = FailureReporter::new(Arc::new(BrokenTracker), true);
        reporter
            .report(&meta(), &HandlerError::Panicked("boom".into()))
            .await;
    }

    #[tokio::test]
    async fn test_report_swallows_tracker_panics() {
        let reporter = FailureReporter::new(Arc::new(PanickingTracker), true);
        reporter.report(&meta(), &HandlerError::failed("boom")).await;
        assert!(reporter.logs_failures());
    }
}
