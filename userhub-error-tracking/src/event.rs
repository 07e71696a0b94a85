//! Event model sent to the collector.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Severity of a captured event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Warning,
    #[default]
    Error,
    Fatal,
}

/// A single captured exception with its context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub exception_type: String,
    pub message: String,
    pub tags: BTreeMap<String, String>,
    pub extra: BTreeMap<String, Value>,
}

impl ErrorEvent {
    pub fn new(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level: Level::Error,
            exception_type: exception_type.into(),
            message: message.into(),
            tags: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Attach an indexed, searchable tag.
    #[inline]
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.tags.insert(key.into(), value.to_string());
        self
    }

    /// Attach arbitrary structured context.
    #[inline]
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Render the store payload understood by the collector.
    pub fn to_payload(&self, environment: &str, release: Option<&str>) -> Value {
        let mut payload = json!({
            "event_id": self.event_id.simple().to_string(),
            "timestamp": self.timestamp.to_rfc3339(),
            "platform": "other",
            "level": self.level,
            "environment": environment,
            "logger": "userhub.jobs",
            "exception": {
                "values": [{
                    "type": self.exception_type,
                    "value": self.message,
                }]
            },
            "tags": self.tags,
            "extra": self.extra,
        });

        if let (Some(release), Some(obj)) = (release, payload.as_object_mut()) {
            obj.insert("release".into(), Value::String(release.to_owned()));
        }
        payload
    }
}
