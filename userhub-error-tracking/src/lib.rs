//! Error-tracking sink for the UserHub backend.
//!
//! Background job failures never reach the request that produced the job, so they are
//! forwarded to an external collector instead. This crate exposes the
//! [`ErrorTracker`] trait and two implementations:
//!
//! - [`DisabledTracker`] - accepts events and drops them (no DSN configured)
//! - [`DsnTracker`] - posts store events to the endpoint described by a [`Dsn`]
//!
//! # Example
//!
//! ```rust,no_run
//! use userhub_error_tracking::{init, ErrorEvent, TrackingConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TrackingConfig {
//!         dsn: Some("https://public@errors.example.com/42".into()),
//!         ..TrackingConfig::default()
//!     };
//!     let tracker = init(&config).expect("valid dsn");
//!
//!     let event = ErrorEvent::new("NetworkError", "connection reset by peer")
//!         .with_tag("queue", "UpdateUserMail");
//!     let _ = tracker.capture_exception(event).await;
//! }
//! ```

mod dsn;
mod error;
mod event;
mod tracker;

use std::sync::Arc;

pub use dsn::Dsn;
pub use error::TrackingError;
pub use event::{ErrorEvent, Level};
pub use tracker::{DisabledTracker, DsnTracker, ErrorTracker, TrackingConfig};

/// Build the tracker described by `config`.
///
/// Without a DSN the returned tracker silently drops events.
pub fn init(config: &TrackingConfig) -> Result<Arc<dyn ErrorTracker>, TrackingError> {
    match config.dsn.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            let dsn: Dsn = raw.parse()?;
            tracing::info!(host = %dsn.host(), project = %dsn.project_id(), "error tracking enabled");
            Ok(Arc::new(DsnTracker::new(dsn, config)?))
        }
        _ => {
            tracing::info!("error tracking disabled: no DSN configured");
            Ok(Arc::new(DisabledTracker))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_without_dsn_is_disabled() {
        let tracker = init(&TrackingConfig::default()).expect("init");
        let result = tracker
            .capture_exception(ErrorEvent::new("Error", "ignored"))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_init_blank_dsn_is_disabled() {
        let config = TrackingConfig {
            dsn: Some("   ".into()),
            ..TrackingConfig::default()
        };
        assert!(init(&config).is_ok());
    }

    #[test]
    fn test_init_rejects_invalid_dsn() {
        let config = TrackingConfig {
            dsn: Some("not a dsn".into()),
            ..TrackingConfig::default()
        };
        assert!(matches!(init(&config), Err(TrackingError::InvalidDsn(_))));
    }
}
