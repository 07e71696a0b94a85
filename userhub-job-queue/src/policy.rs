//! Backend-owned retry and lease policy.

use std::time::Duration;

/// Delay strategy applied between attempts of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Retry as soon as a worker is free.
    #[default]
    Immediate,
    /// Wait the same amount of time before every retry.
    Fixed(Duration),
    /// Double the delay after every attempt, starting at `base` and capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before the next lease, given how many attempts have already run.
    pub fn delay(&self, attempts: u32) -> Duration {
        match *self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Exponential { base, max } => {
                let exponent = attempts.saturating_sub(1).min(31);
                base.checked_mul(1u32 << exponent).unwrap_or(max).min(max)
            }
        }
    }
}

/// How many times a job may be attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// A policy that dead-letters on the first failure.
    pub const fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Immediate,
        }
    }

    /// Returns true if a job that has run `attempts` times may run again.
    #[inline]
    pub const fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(60),
            },
        }
    }
}

/// Full policy of a backend queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// How long a worker may hold a job before it is considered stalled and reclaimed.
    pub lease_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}
