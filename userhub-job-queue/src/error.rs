//! Error types for the job queue system.

use thiserror::Error;
use uuid::Uuid;

/// Errors that may occur while interacting with the job queue.
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("job `{0}` is already registered")]
    DuplicateJob(String),

    #[error("no job registered under `{0}`")]
    UnknownJob(String),

    #[error("job queue backend is unavailable: {0}")]
    Unavailable(String),

    #[error("job queue backend error: {0}")]
    Backend(String),

    #[error("lease for job {0} is no longer held by this worker")]
    LeaseLost(Uuid),

    #[error("queue processing has already been started")]
    AlreadyProcessing,

    #[error("failed to serialize job: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobQueueError {
    /// Returns true for errors caused by the job registration set rather than runtime state.
    #[inline]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::DuplicateJob(_) | Self::UnknownJob(_))
    }
}

/// Errors raised by job handlers.
///
/// These never escape a worker loop; they are reported and the job is handed back to
/// the backend retry policy.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Wrap any error raised while handling a job.
    pub fn failed<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Failed(error.into())
    }

    /// Short name of the failure category, used as the exception type when reporting.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "InvalidPayload",
            Self::Failed(_) => "HandlerFailure",
            Self::Panicked(_) => "HandlerPanic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors() {
        assert!(JobQueueError::DuplicateJob("a".into()).is_configuration());
        assert!(JobQueueError::UnknownJob("a".into()).is_configuration());
        assert!(!JobQueueError::Unavailable("down".into()).is_configuration());
        assert!(!JobQueueError::AlreadyProcessing.is_configuration());
    }

    #[test]
    fn test_handler_error_display() {
        let err = HandlerError::failed("smtp timeout");
        assert_eq!(err.to_string(), "smtp timeout");
        assert_eq!(err.kind(), "HandlerFailure");

        let err = HandlerError::Panicked("index out of bounds".into());
        assert_eq!(err.to_string(), "handler panicked: index out of bounds");
    }
}
