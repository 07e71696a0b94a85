//! Core types for the job queue system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A unit of deferred work stored by a backend queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: Uuid,
    pub queue: String,
    pub payload: Value,
    /// Number of times the job has been leased, including the current lease.
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl JobInstance {
    /// Create a new job that has not been leased yet.
    #[inline]
    pub fn new(queue: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            payload,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Metadata describing this job, without the payload.
    #[inline]
    pub fn meta(&self) -> JobMeta {
        JobMeta {
            id: self.id,
            queue: self.queue.clone(),
            attempts: self.attempts,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Job metadata passed to the failure reporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMeta {
    pub id: Uuid,
    pub queue: String,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Temporary ownership of a job by one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub job: JobInstance,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Where a job currently sits inside its backend queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Failed,
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "delayed" => Ok(Self::Delayed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job state `{other}`")),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Delayed => "delayed",
            Self::Failed => "failed",
        })
    }
}

/// Point-in-time view of a stored job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job: JobInstance,
    pub state: JobState,
    pub last_error: Option<String>,
}

/// Number of jobs per state in one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub failed: usize,
}

/// What the backend decided to do with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// The job will become leasable again at `retry_at`.
    Retrying { retry_at: DateTime<Utc> },
    /// The retry budget is exhausted; the job is parked in the failed set.
    DeadLettered,
}

impl std::fmt::Display for FailureDisposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retrying { retry_at } => write!(f, "retrying at {}", retry_at.to_rfc3339()),
            Self::DeadLettered => f.write_str("dead-lettered"),
        }
    }
}
