//! Tracker implementations.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::dsn::Dsn;
use crate::error::TrackingError;
use crate::event::ErrorEvent;

/// Client identifier sent with every event.
const CLIENT_NAME: &str = concat!("userhub/", env!("CARGO_PKG_VERSION"));

/// Settings used by [`crate::init`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    pub dsn: Option<String>,
    pub environment: String,
    pub release: Option<String>,
    pub timeout: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: "development".to_string(),
            release: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Sink that accepts captured exceptions.
#[async_trait]
pub trait ErrorTracker: Send + Sync {
    /// Forward an event to the collector.
    async fn capture_exception(&self, event: ErrorEvent) -> Result<(), TrackingError>;
}

/// Tracker used when no DSN is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTracker;

#[async_trait]
impl ErrorTracker for DisabledTracker {
    async fn capture_exception(&self, event: ErrorEvent) -> Result<(), TrackingError> {
        debug!(
            event_id = %event.event_id,
            exception_type = %event.exception_type,
            "error tracking disabled; dropping event"
        );
        Ok(())
    }
}

/// Tracker that posts store events over HTTP.
#[derive(Debug, Clone)]
pub struct DsnTracker {
    client: Client,
    dsn: Dsn,
    environment: String,
    release: Option<String>,
}

impl DsnTracker {
    pub fn new(dsn: Dsn, config: &TrackingConfig) -> Result<Self, TrackingError> {
        let client = Client::builder()
            .user_agent(CLIENT_NAME)
            .timeout(config.timeout)
            .build()
            .map_err(|e| TrackingError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            dsn,
            environment: config.environment.clone(),
            release: config.release.clone(),
        })
    }

    #[inline]
    pub fn dsn(&self) -> &Dsn {
        &self.dsn
    }
}

#[async_trait]
impl ErrorTracker for DsnTracker {
    async fn capture_exception(&self, event: ErrorEvent) -> Result<(), TrackingError> {
        let payload = event.to_payload(&self.environment, self.release.as_deref());

        let response = self
            .client
            .post(self.dsn.store_url())
            .header("X-Sentry-Auth", self.dsn.auth_header(CLIENT_NAME))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "failed to send event to error tracker");
                TrackingError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TrackingError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!(event_id = %event.event_id, "event delivered to error tracker");
        Ok(())
    }
}
