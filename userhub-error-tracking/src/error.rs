//! Error types for the error-tracking sink.

use thiserror::Error;

/// Errors that may occur while configuring or talking to the error collector.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackingError {
    #[error("invalid DSN: {0}")]
    InvalidDsn(String),

    #[error("failed to deliver event: {0}")]
    Transport(String),

    #[error("collector rejected event with status {status}: {message}")]
    Rejected { status: u16, message: String },
}
