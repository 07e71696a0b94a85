//! Mail delivery errors.

use thiserror::Error;
use userhub_job_queue::HandlerError;

/// Errors that may occur while rendering or sending mail.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("unknown mail template `{0}`")]
    UnknownTemplate(String),

    #[error("template `{template}` references missing variable `{variable}`")]
    MissingVariable { template: String, variable: String },

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("mail transport error: {0}")]
    Transport(String),

    #[error("mail provider rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl From<MailError> for HandlerError {
    fn from(error: MailError) -> Self {
        HandlerError::failed(error)
    }
}
