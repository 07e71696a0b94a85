use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Pre-compiled regex for hostname validation (compiled once at first use)
static HOSTNAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][-a-zA-Z0-9\.]*[a-zA-Z0-9]$").unwrap());

/// Queue key prefixes end up inside Redis key names; braces would break hash tags.
static KEY_PREFIX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][-A-Za-z0-9_:\.]*$").unwrap());

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub queue: Option<QueueSection>,
    #[serde(default)]
    pub error_tracking: Option<ErrorTrackingSection>,
    #[serde(default)]
    pub mail: Option<MailSection>,
    #[serde(default)]
    pub worker: Option<WorkerSection>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct QueueSection {
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: Option<u32>,
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub lease_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff: Option<String>,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
    #[serde(default)]
    pub backoff_max_ms: Option<u64>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorTrackingSection {
    #[serde(default)]
    pub dsn: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct MailSection {
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerSection {
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

/// Parse configuration from a string with optional format hint
#[inline]
fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try to parse config by attempting each enabled format
#[inline]
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(any(feature = "yaml", feature = "toml", feature = "json"))]
    {
        Err(ConfigError::Parse(
            "failed to parse config as any supported format".into(),
        ))
    }

    #[cfg(not(any(feature = "yaml", feature = "toml", feature = "json")))]
    {
        let _ = s;
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Concrete application configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    /// Deployment environment name, e.g. `development` or `production`.
    pub environment: String,
    pub queue: QueueConfig,
    pub error_tracking: ErrorTrackingConfig,
    pub mail: MailConfig,
    pub worker: WorkerConfig,
}

impl Config {
    /// Job failures are written to the log only in development.
    #[inline]
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueConfig {
    /// `redis` or `memory`.
    pub driver: String,
    /// Full connection URL; takes precedence over host/port/password/db.
    pub redis_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,
    pub key_prefix: String,
    pub lease_timeout_secs: u64,
    pub max_attempts: u32,
    /// `immediate`, `fixed` or `exponential`.
    pub backoff: String,
    pub backoff_ms: u64,
    pub backoff_max_ms: u64,
    pub poll_interval_secs: u64,
}

impl QueueConfig {
    /// Connection URL for the Redis driver.
    pub fn connection_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = self.redis_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.trim().to_string());
        }

        let mut url = url::Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))
            .map_err(|e| ConfigError::Validation(format!("invalid queue.host: {}", e)))?;
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| ConfigError::Validation("queue.password cannot be set".into()))?;
        }
        Ok(url.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorTrackingConfig {
    pub dsn: Option<String>,
    pub release: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailConfig {
    /// `log` or `http`.
    pub driver: String,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerConfig {
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3333,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            environment: "development".to_string(),
            queue: QueueConfig {
                driver: "redis".to_string(),
                redis_url: None,
                host: "127.0.0.1".to_string(),
                port: 6379,
                password: None,
                db: 0,
                key_prefix: "userhub".to_string(),
                lease_timeout_secs: 30,
                max_attempts: 3,
                backoff: "exponential".to_string(),
                backoff_ms: 1000,
                backoff_max_ms: 60_000,
                poll_interval_secs: 5,
            },
            error_tracking: ErrorTrackingConfig {
                dsn: None,
                release: None,
                timeout_secs: 5,
            },
            mail: MailConfig {
                driver: "log".to_string(),
                api_url: None,
                api_key: None,
                from: "UserHub <noreply@userhub.local>".to_string(),
                timeout_secs: 10,
            },
            worker: WorkerConfig { enabled: true },
        }
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    // Avoid allocation by checking bytes directly for common cases
    let bytes = s.as_bytes();
    match bytes {
        b"1" | b"true" | b"TRUE" | b"True" | b"yes" | b"YES" | b"Yes" | b"y" | b"Y" => Ok(true),
        b"0" | b"false" | b"FALSE" | b"False" | b"no" | b"NO" | b"No" | b"n" | b"N" => Ok(false),
        _ => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" => Ok(true),
            "false" | "no" | "n" => Ok(false),
            _ => Err(()),
        },
    }
}

/// Helper macro to apply optional value if present
macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
    ($target:expr, $source:expr, wrap) => {
        if let Some(v) = $source {
            $target = Some(v);
        }
    };
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        if let Some(server) = raw.server {
            apply_opt!(cfg.server.host, server.host);
            apply_opt!(cfg.server.port, server.port);
        }
        if let Some(logging) = raw.logging {
            apply_opt!(cfg.logging.level, logging.level);
            apply_opt!(cfg.logging.json, logging.json);
        }
        apply_opt!(cfg.environment, raw.environment);
        if let Some(q) = raw.queue {
            apply_opt!(cfg.queue.driver, q.driver);
            apply_opt!(cfg.queue.redis_url, q.redis_url, wrap);
            apply_opt!(cfg.queue.host, q.host);
            apply_opt!(cfg.queue.port, q.port);
            apply_opt!(cfg.queue.password, q.password, wrap);
            apply_opt!(cfg.queue.db, q.db);
            apply_opt!(cfg.queue.key_prefix, q.key_prefix);
            apply_opt!(cfg.queue.lease_timeout_secs, q.lease_timeout_secs);
            apply_opt!(cfg.queue.max_attempts, q.max_attempts);
            apply_opt!(cfg.queue.backoff, q.backoff);
            apply_opt!(cfg.queue.backoff_ms, q.backoff_ms);
            apply_opt!(cfg.queue.backoff_max_ms, q.backoff_max_ms);
            apply_opt!(cfg.queue.poll_interval_secs, q.poll_interval_secs);
        }
        if let Some(t) = raw.error_tracking {
            apply_opt!(cfg.error_tracking.dsn, t.dsn, wrap);
            apply_opt!(cfg.error_tracking.release, t.release, wrap);
            apply_opt!(cfg.error_tracking.timeout_secs, t.timeout_secs);
        }
        if let Some(mail) = raw.mail {
            apply_opt!(cfg.mail.driver, mail.driver);
            apply_opt!(cfg.mail.api_url, mail.api_url, wrap);
            apply_opt!(cfg.mail.api_key, mail.api_key, wrap);
            apply_opt!(cfg.mail.from, mail.from);
            apply_opt!(cfg.mail.timeout_secs, mail.timeout_secs);
        }
        if let Some(worker) = raw.worker {
            apply_opt!(cfg.worker.enabled, worker.enabled);
        }
    }

    // Apply environment variable overrides (env takes precedence)
    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

/// Helper to parse env var as a specific type
#[inline]
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Helper to parse env var as bool
#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

/// Helper to get env var as string
#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Apply all environment variable overrides to config
fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Server
    if let Some(v) = env_str("USERHUB_SERVER_HOST") {
        cfg.server.host = v;
    }
    if let Some(v) = env_parse::<u16>("USERHUB_SERVER_PORT")? {
        cfg.server.port = v;
    }

    // Logging
    if let Some(v) = env_str("USERHUB_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("USERHUB_LOG_JSON")? {
        cfg.logging.json = v;
    }

    if let Some(v) = env_str("USERHUB_ENV") {
        cfg.environment = v;
    }

    // Queue
    if let Some(v) = env_str("USERHUB_QUEUE_DRIVER") {
        cfg.queue.driver = v;
    }
    if let Some(v) = env_str("USERHUB_REDIS_URL") {
        cfg.queue.redis_url = Some(v);
    }
    if let Some(v) = env_str("USERHUB_REDIS_HOST") {
        cfg.queue.host = v;
    }
    if let Some(v) = env_parse::<u16>("USERHUB_REDIS_PORT")? {
        cfg.queue.port = v;
    }
    if let Some(v) = env_str("USERHUB_REDIS_PASSWORD") {
        cfg.queue.password = Some(v);
    }
    if let Some(v) = env_parse::<u32>("USERHUB_REDIS_DB")? {
        cfg.queue.db = v;
    }
    if let Some(v) = env_str("USERHUB_QUEUE_KEY_PREFIX") {
        cfg.queue.key_prefix = v;
    }
    if let Some(v) = env_parse::<u64>("USERHUB_QUEUE_LEASE_TIMEOUT_SECS")? {
        cfg.queue.lease_timeout_secs = v;
    }
    if let Some(v) = env_parse::<u32>("USERHUB_QUEUE_MAX_ATTEMPTS")? {
        cfg.queue.max_attempts = v;
    }
    if let Some(v) = env_str("USERHUB_QUEUE_BACKOFF") {
        cfg.queue.backoff = v;
    }
    if let Some(v) = env_parse::<u64>("USERHUB_QUEUE_BACKOFF_MS")? {
        cfg.queue.backoff_ms = v;
    }
    if let Some(v) = env_parse::<u64>("USERHUB_QUEUE_BACKOFF_MAX_MS")? {
        cfg.queue.backoff_max_ms = v;
    }
    if let Some(v) = env_parse::<u64>("USERHUB_QUEUE_POLL_INTERVAL_SECS")? {
        cfg.queue.poll_interval_secs = v;
    }

    // Error tracking
    if let Some(v) = env_str("USERHUB_ERROR_TRACKING_DSN") {
        cfg.error_tracking.dsn = Some(v);
    }
    if let Some(v) = env_str("USERHUB_RELEASE") {
        cfg.error_tracking.release = Some(v);
    }
    if let Some(v) = env_parse::<u64>("USERHUB_ERROR_TRACKING_TIMEOUT_SECS")? {
        cfg.error_tracking.timeout_secs = v;
    }

    // Mail
    if let Some(v) = env_str("USERHUB_MAIL_DRIVER") {
        cfg.mail.driver = v;
    }
    if let Some(v) = env_str("USERHUB_MAIL_API_URL") {
        cfg.mail.api_url = Some(v);
    }
    if let Some(v) = env_str("USERHUB_MAIL_API_KEY") {
        cfg.mail.api_key = Some(v);
    }
    if let Some(v) = env_str("USERHUB_MAIL_FROM") {
        cfg.mail.from = v;
    }
    if let Some(v) = env_parse::<u64>("USERHUB_MAIL_TIMEOUT_SECS")? {
        cfg.mail.timeout_secs = v;
    }

    // Worker
    if let Some(v) = env_bool("USERHUB_WORKER_ENABLED")? {
        cfg.worker.enabled = v;
    }

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.port == 0 {
        return Err(ConfigError::Validation("server.port must be > 0".into()));
    }
    let host_ok = cfg.server.host.parse::<std::net::IpAddr>().is_ok()
        || HOSTNAME_REGEX.is_match(&cfg.server.host);
    if !host_ok {
        return Err(ConfigError::Validation(format!(
            "invalid server.host: {}",
            cfg.server.host
        )));
    }

    validate_queue(&cfg.queue)?;

    // DSN shape: scheme://public_key@host/project_id
    if let Some(dsn) = cfg.error_tracking.dsn.as_deref().filter(|d| !d.trim().is_empty()) {
        let ok = url::Url::parse(dsn.trim())
            .map(|u| !u.username().is_empty() && u.host_str().is_some())
            .unwrap_or(false);
        if !ok {
            return Err(ConfigError::Validation(format!(
                "invalid error_tracking.dsn: {}",
                dsn
            )));
        }
    }

    match cfg.mail.driver.as_str() {
        "log" => {}
        "http" => {
            let api_url = cfg.mail.api_url.as_deref().unwrap_or_default();
            match url::Url::parse(api_url) {
                Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "mail.api_url must be an http(s) URL for the http driver: {}",
                        api_url
                    )))
                }
            }
        }
        other => {
            return Err(ConfigError::Validation(format!(
                "unsupported mail driver: {}",
                other
            )))
        }
    }
    if cfg.mail.from.trim().is_empty() {
        return Err(ConfigError::Validation("mail.from must be set".into()));
    }

    Ok(())
}

fn validate_queue(queue: &QueueConfig) -> Result<(), ConfigError> {
    match queue.driver.as_str() {
        "memory" => {}
        "redis" => {
            let url = queue.connection_url()?;
            match url::Url::parse(&url) {
                Ok(u) if u.scheme() == "redis" || u.scheme() == "rediss" => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "invalid redis url: {}",
                        url
                    )))
                }
            }
        }
        other => {
            return Err(ConfigError::Validation(format!(
                "unsupported queue driver: {}",
                other
            )))
        }
    }

    if !KEY_PREFIX_REGEX.is_match(&queue.key_prefix) {
        return Err(ConfigError::Validation(format!(
            "invalid queue.key_prefix: {}",
            queue.key_prefix
        )));
    }
    if queue.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "queue.max_attempts must be > 0".into(),
        ));
    }
    if queue.lease_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "queue.lease_timeout_secs must be > 0".into(),
        ));
    }
    if queue.poll_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "queue.poll_interval_secs must be > 0".into(),
        ));
    }
    match queue.backoff.as_str() {
        "immediate" | "fixed" | "exponential" => {}
        other => {
            return Err(ConfigError::Validation(format!(
                "unsupported queue backoff: {}",
                other
            )))
        }
    }
    if queue.backoff == "exponential" && queue.backoff_max_ms < queue.backoff_ms {
        return Err(ConfigError::Validation(
            "queue.backoff_max_ms must be >= queue.backoff_ms".into(),
        ));
    }
    Ok(())
}
