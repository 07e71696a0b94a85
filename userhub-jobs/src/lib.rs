//! Concrete job implementations for the UserHub backend.
//!
//! This crate provides implementations of the [`JobExecutor`](userhub_job_queue::JobExecutor)
//! trait for the job types used in the backend, together with the mail delivery they
//! rely on.
//!
//! # Job Types
//!
//! - `UpdateUserMail` - Notify a user that their account data changed
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use userhub_job_queue::JobRegistry;
//! use userhub_jobs::{register_all_executors, LogMailer};
//!
//! let mut registry = JobRegistry::new();
//! register_all_executors(&mut registry, Arc::new(LogMailer::new("noreply@userhub.local")))
//!     .expect("no duplicate jobs");
//! ```

mod error;
mod mail;
mod templates;
mod update_user_mail;

use std::sync::Arc;

pub use error::MailError;
pub use mail::{HttpMailer, LogMailer, MailMessage, Mailer, RenderedMail};
pub use templates::{Templates, UPDATE_USER_TEMPLATE};
pub use update_user_mail::{
    MailUser, UpdateUserMailExecutor, UpdateUserMailPayload, UPDATE_USER_SUBJECT,
};

use userhub_job_queue::{JobQueueError, JobRegistry};

/// Register all available job executors.
pub fn register_all_executors(
    registry: &mut JobRegistry,
    mailer: Arc<dyn Mailer>,
) -> Result<(), JobQueueError> {
    registry.register(UpdateUserMailExecutor::new(mailer))?;
    Ok(())
}

/// Job type constants for type-safe job references.
pub mod job_types {
    pub const UPDATE_USER_MAIL: &str = "UpdateUserMail";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_executors() {
        let mut registry = JobRegistry::new();
        register_all_executors(&mut registry, Arc::new(LogMailer::new("a@b.c"))).unwrap();
        assert!(registry.contains(job_types::UPDATE_USER_MAIL));

        let err = register_all_executors(&mut registry, Arc::new(LogMailer::new("a@b.c")))
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
