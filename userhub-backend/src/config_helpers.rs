use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use userhub_config::{Config, QueueConfig};
use userhub_error_tracking::{ErrorTracker, TrackingConfig};
use userhub_job_queue::{
    Backoff, MemoryBackend, QueueBackend, QueuePolicy, RedisBackend, RetryPolicy, WorkerOptions,
};
use userhub_jobs::{HttpMailer, LogMailer, Mailer};

/// Parse host:port into a SocketAddr, with fallback to 0.0.0.0.
pub fn parse_bind_address(host: &str, port: u16) -> SocketAddr {
    host.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .or_else(|_| host.parse::<SocketAddr>())
        .or_else(|_| host.parse::<Ipv6Addr>().map(|ip| SocketAddr::new(IpAddr::V6(ip), port)))
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)))
}

/// Translate the queue section into the policy every backend queue enforces.
///
/// Accepts the same backoff names as `validate_config`.
pub fn queue_policy_from_config(cfg: &QueueConfig) -> anyhow::Result<QueuePolicy> {
    let backoff = match cfg.backoff.as_str() {
        "immediate" => Backoff::Immediate,
        "fixed" => Backoff::Fixed(Duration::from_millis(cfg.backoff_ms)),
        "exponential" => Backoff::Exponential {
            base: Duration::from_millis(cfg.backoff_ms),
            max: Duration::from_millis(cfg.backoff_max_ms),
        },
        other => anyhow::bail!("unsupported queue backoff: {other}"),
    };

    Ok(QueuePolicy {
        lease_timeout: Duration::from_secs(cfg.lease_timeout_secs),
        retry: RetryPolicy {
            max_attempts: cfg.max_attempts,
            backoff,
        },
    })
}

/// Connect the configured queue backend.
pub async fn build_backend(cfg: &Config) -> anyhow::Result<Arc<dyn QueueBackend>> {
    let policy = queue_policy_from_config(&cfg.queue)?;
    match cfg.queue.driver.as_str() {
        "memory" => {
            tracing::warn!("using in-memory queue backend; jobs do not survive a restart");
            Ok(Arc::new(MemoryBackend::new(policy)))
        }
        _ => {
            let url = cfg.queue.connection_url()?;
            let backend = RedisBackend::connect(&url, cfg.queue.key_prefix.clone(), policy)
                .await
                .with_context(|| {
                    format!(
                        "failed to connect to redis at {}:{}",
                        cfg.queue.host, cfg.queue.port
                    )
                })?;
            Ok(Arc::new(backend))
        }
    }
}

/// Build the error tracker from application config.
pub fn tracker_from_config(cfg: &Config) -> anyhow::Result<Arc<dyn ErrorTracker>> {
    let tracking = TrackingConfig {
        dsn: cfg.error_tracking.dsn.clone(),
        environment: cfg.environment.clone(),
        release: cfg.error_tracking.release.clone(),
        timeout: Duration::from_secs(cfg.error_tracking.timeout_secs),
    };
    Ok(userhub_error_tracking::init(&tracking)?)
}

/// Build the mail transport used by the mail jobs.
pub fn mailer_from_config(cfg: &Config) -> anyhow::Result<Arc<dyn Mailer>> {
    let mail = &cfg.mail;
    match mail.driver.as_str() {
        "http" => {
            let endpoint = mail
                .api_url
                .clone()
                .context("mail.api_url is required for the http mail driver")?;
            let mailer = HttpMailer::new(
                endpoint,
                mail.api_key.clone(),
                mail.from.clone(),
                Duration::from_secs(mail.timeout_secs),
            )?;
            Ok(Arc::new(mailer))
        }
        _ => Ok(Arc::new(LogMailer::new(mail.from.clone()))),
    }
}

pub fn worker_options_from_config(cfg: &Config) -> WorkerOptions {
    WorkerOptions {
        poll_interval: Duration::from_secs(cfg.queue.poll_interval_secs),
        ..WorkerOptions::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_address_falls_back_to_any() {
        assert_eq!(
            parse_bind_address("127.0.0.1", 8080),
            SocketAddr::from(([127, 0, 0, 1], 8080))
        );
        assert_eq!(
            parse_bind_address("not-an-ip", 3333),
            SocketAddr::from(([0, 0, 0, 0], 3333))
        );
        assert!(parse_bind_address("::1", 3333).is_ipv6());
    }

    #[test]
    fn policy_follows_backoff_name() {
        let mut cfg = Config::default();
        let policy = queue_policy_from_config(&cfg.queue).unwrap();
        assert_eq!(policy.lease_timeout, Duration::from_secs(30));
        assert_eq!(policy.retry.max_attempts, 3);
        assert_eq!(
            policy.retry.backoff,
            Backoff::Exponential {
                base: Duration::from_millis(1000),
                max: Duration::from_millis(60_000),
            }
        );

        cfg.queue.backoff = "fixed".into();
        cfg.queue.backoff_ms = 250;
        assert_eq!(
            queue_policy_from_config(&cfg.queue).unwrap().retry.backoff,
            Backoff::Fixed(Duration::from_millis(250))
        );

        cfg.queue.backoff = "immediate".into();
        assert_eq!(
            queue_policy_from_config(&cfg.queue).unwrap().retry.backoff,
            Backoff::Immediate
        );
    }

    #[test]
    fn policy_rejects_names_validation_rejects() {
        for name in ["none", "Fixed", "linear", ""] {
            let mut cfg = Config::default();
            cfg.queue.backoff = name.into();
            assert!(userhub_config::validate_config(&cfg).is_err(), "{name}");
            assert!(queue_policy_from_config(&cfg.queue).is_err(), "{name}");
        }
    }

    #[tokio::test]
    async fn memory_driver_needs_no_server() {
        let mut cfg = Config::default();
        cfg.queue.driver = "memory".into();
        let backend = build_backend(&cfg).await.expect("memory backend");
        let queue = backend.open_queue("UpdateUserMail").await.expect("queue");
        assert_eq!(queue.counts().await.expect("counts").waiting, 0);
    }

    #[test]
    fn http_mailer_requires_endpoint() {
        let mut cfg = Config::default();
        assert!(mailer_from_config(&cfg).is_ok());
        cfg.mail.driver = "http".into();
        assert!(mailer_from_config(&cfg).is_err());
        cfg.mail.api_url = Some("https://mail.example.com/send".into());
        assert!(mailer_from_config(&cfg).is_ok());
    }

    #[test]
    fn worker_poll_interval_comes_from_queue_section() {
        let mut cfg = Config::default();
        cfg.queue.poll_interval_secs = 2;
        assert_eq!(
            worker_options_from_config(&cfg).poll_interval,
            Duration::from_secs(2)
        );
    }
}
