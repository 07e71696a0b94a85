//! Redis-backed queue backend.
//!
//! Every queue lives under its own key namespace `{prefix}:{<queue>}:*` (the braces
//! keep all keys of a queue in one cluster slot):
//!
//! - `jobs` - hash of job id to serialized [`JobInstance`]
//! - `waiting` - list consumed from the right, new jobs pushed on the left
//! - `active` - list of leased job ids
//! - `leases` / `owners` - lease deadline (ms) and lease token per active job
//! - `attempts` / `errors` - attempt counter and last error per job
//! - `delayed` - sorted set of jobs waiting out a retry backoff
//! - `failed` - dead-lettered job ids
//! - `popped` - first time an id was seen in `active` without a lease
//!
//! Leasing blocks on `BLMOVE` over a dedicated connection; every state transition
//! that touches more than one key runs as a Lua script. An id moved to `active` whose
//! claim never ran is returned to `waiting` once it has been unclaimed for a full
//! lease timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, Script};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{utc_after, BackendQueue, QueueBackend};
use crate::error::JobQueueError;
use crate::policy::QueuePolicy;
use crate::types::{FailureDisposition, JobInstance, JobSnapshot, JobState, Lease, QueueCounts};

const CLAIM_SCRIPT: &str = r"
if not redis.call('LPOS', KEYS[2], ARGV[1]) then
  return false
end
redis.call('ZREM', KEYS[10], ARGV[1])
local body = redis.call('HGET', KEYS[1], ARGV[1])
if not body then
  redis.call('LREM', KEYS[2], 1, ARGV[1])
  return false
end
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
redis.call('HSET', KEYS[4], ARGV[1], ARGV[2])
local attempts = redis.call('HINCRBY', KEYS[5], ARGV[1], 1)
return {body, attempts}
";

const ACK_SCRIPT: &str = r"
if redis.call('HGET', KEYS[4], ARGV[1]) ~= ARGV[2] then
  return 0
end
redis.call('LREM', KEYS[2], 1, ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('HDEL', KEYS[5], ARGV[1])
redis.call('HDEL', KEYS[6], ARGV[1])
redis.call('HDEL', KEYS[1], ARGV[1])
return 1
";

const FAIL_SCRIPT: &str = r"
if redis.call('HGET', KEYS[4], ARGV[1]) ~= ARGV[2] then
  return -1
end
redis.call('LREM', KEYS[2], 1, ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('HSET', KEYS[6], ARGV[1], ARGV[5])
local attempts = tonumber(redis.call('HGET', KEYS[5], ARGV[1]) or '0')
if attempts < tonumber(ARGV[3]) then
  if tonumber(ARGV[4]) <= tonumber(ARGV[6]) then
    redis.call('LPUSH', KEYS[8], ARGV[1])
  else
    redis.call('ZADD', KEYS[7], ARGV[4], ARGV[1])
  end
  return 1
end
redis.call('LPUSH', KEYS[9], ARGV[1])
return 0
";

const MAINTAIN_SCRIPT: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[7], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[7], id)
  redis.call('LPUSH', KEYS[8], id)
end
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[3], id)
  redis.call('HDEL', KEYS[4], id)
  redis.call('LREM', KEYS[2], 1, id)
  local attempts = tonumber(redis.call('HGET', KEYS[5], id) or '0')
  if attempts < tonumber(ARGV[2]) then
    redis.call('RPUSH', KEYS[8], id)
  else
    redis.call('HSET', KEYS[6], id, 'lease expired')
    redis.call('LPUSH', KEYS[9], id)
  end
end
local stranded = 0
for _, id in ipairs(redis.call('LRANGE', KEYS[2], 0, -1)) do
  if redis.call('HEXISTS', KEYS[4], id) == 0 then
    local seen = redis.call('ZSCORE', KEYS[10], id)
    if not seen then
      redis.call('ZADD', KEYS[10], ARGV[1], id)
    elseif tonumber(seen) + tonumber(ARGV[3]) <= tonumber(ARGV[1]) then
      redis.call('ZREM', KEYS[10], id)
      redis.call('LREM', KEYS[2], 1, id)
      redis.call('RPUSH', KEYS[8], id)
      stranded = stranded + 1
    end
  end
end
return #due + #expired + stranded
";

const RELEASE_SCRIPT: &str = r"
if redis.call('HEXISTS', KEYS[4], ARGV[1]) == 1 then
  return 0
end
redis.call('ZREM', KEYS[10], ARGV[1])
if redis.call('LREM', KEYS[2], 1, ARGV[1]) == 0 then
  return 0
end
redis.call('RPUSH', KEYS[8], ARGV[1])
return 1
";

const GET_SCRIPT: &str = r"
local body = redis.call('HGET', KEYS[1], ARGV[1])
if not body then
  return false
end
local attempts = redis.call('HGET', KEYS[5], ARGV[1]) or '0'
local err = redis.call('HGET', KEYS[6], ARGV[1]) or ''
local state = 'waiting'
if redis.call('HEXISTS', KEYS[4], ARGV[1]) == 1 or redis.call('LPOS', KEYS[2], ARGV[1]) then
  state = 'active'
elseif redis.call('ZSCORE', KEYS[7], ARGV[1]) then
  state = 'delayed'
elseif redis.call('LPOS', KEYS[9], ARGV[1]) then
  state = 'failed'
end
return {body, attempts, state, err}
";

/// Map a Redis error, treating connection problems as backend unavailability.
fn map_redis_error(err: RedisError) -> JobQueueError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        JobQueueError::Unavailable(err.to_string())
    } else {
        JobQueueError::Backend(err.to_string())
    }
}

#[inline]
fn millis(at: chrono::DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[inline]
fn millis_of(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Backend storing queues in Redis.
#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    conn: MultiplexedConnection,
    prefix: String,
    policy: QueuePolicy,
}

impl fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBackend")
            .field("prefix", &self.prefix)
            .field("policy", &self.policy)
            .finish()
    }
}

impl RedisBackend {
    /// Connect to Redis and verify the connection with `PING`.
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
        policy: QueuePolicy,
    ) -> Result<Self, JobQueueError> {
        let client =
            Client::open(url).map_err(|e| JobQueueError::Unavailable(e.to_string()))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| JobQueueError::Unavailable(e.to_string()))?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| JobQueueError::Unavailable(e.to_string()))?;

        let prefix = prefix.into();
        tracing::info!(prefix = %prefix, "connected to redis queue backend");

        Ok(Self {
            client,
            conn,
            prefix,
            policy,
        })
    }

    #[inline]
    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn open_queue(&self, name: &str) -> Result<Arc<dyn BackendQueue>, JobQueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| JobQueueError::Unavailable(e.to_string()))?;

        Ok(Arc::new(RedisQueue {
            name: name.to_owned(),
            keys: QueueKeys::new(&self.prefix, name),
            client: self.client.clone(),
            conn,
            blocking: Mutex::new(None),
            policy: self.policy,
            scripts: Scripts::new(),
        }))
    }
}

#[derive(Debug)]
struct QueueKeys {
    jobs: String,
    waiting: String,
    active: String,
    leases: String,
    owners: String,
    attempts: String,
    errors: String,
    delayed: String,
    failed: String,
    popped: String,
}

impl QueueKeys {
    fn new(prefix: &str, queue: &str) -> Self {
        let key = |suffix: &str| format!("{prefix}:{{{queue}}}:{suffix}");
        Self {
            jobs: key("jobs"),
            waiting: key("waiting"),
            active: key("active"),
            leases: key("leases"),
            owners: key("owners"),
            attempts: key("attempts"),
            errors: key("errors"),
            delayed: key("delayed"),
            failed: key("failed"),
            popped: key("popped"),
        }
    }

    /// Keys in the order every script expects them.
    fn all(&self) -> [&str; 10] {
        [
            self.jobs.as_str(),
            self.active.as_str(),
            self.leases.as_str(),
            self.owners.as_str(),
            self.attempts.as_str(),
            self.errors.as_str(),
            self.delayed.as_str(),
            self.waiting.as_str(),
            self.failed.as_str(),
            self.popped.as_str(),
        ]
    }
}

struct Scripts {
    claim: Script,
    ack: Script,
    fail: Script,
    maintain: Script,
    release: Script,
    get: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            claim: Script::new(CLAIM_SCRIPT),
            ack: Script::new(ACK_SCRIPT),
            fail: Script::new(FAIL_SCRIPT),
            maintain: Script::new(MAINTAIN_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
            get: Script::new(GET_SCRIPT),
        }
    }
}

struct RedisQueue {
    name: String,
    keys: QueueKeys,
    client: Client,
    conn: MultiplexedConnection,
    /// Connection reserved for blocking pops, opened on first lease.
    blocking: Mutex<Option<MultiplexedConnection>>,
    policy: QueuePolicy,
    scripts: Scripts,
}

impl RedisQueue {
    /// Promote due delayed jobs and reclaim expired leases.
    async fn maintain(&self) -> Result<(), JobQueueError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.maintain.prepare_invoke();
        for key in self.keys.all() {
            invocation.key(key);
        }
        let moved: i64 = invocation
            .arg(millis(Utc::now()))
            .arg(self.policy.retry.max_attempts)
            .arg(millis_of(self.policy.lease_timeout))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        if moved > 0 {
            tracing::debug!(queue = %self.name, moved, "promoted or reclaimed jobs");
        }
        Ok(())
    }

    /// Put a popped but unclaimed id back at the head of `waiting`.
    ///
    /// Best effort: if this fails too, maintenance requeues the id later.
    async fn release(&self, id: &str) {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.release.prepare_invoke();
        for key in self.keys.all() {
            invocation.key(key);
        }
        match invocation.arg(id).invoke_async::<i64>(&mut conn).await {
            Ok(_) => tracing::debug!(queue = %self.name, job_id = %id, "released unclaimed job"),
            Err(e) => tracing::warn!(
                queue = %self.name,
                job_id = %id,
                error = %e,
                "failed to release unclaimed job; it is requeued after the lease timeout"
            ),
        }
    }

    /// Move the next waiting id to the active list, blocking up to `wait`.
    async fn pop_waiting(&self, wait: Duration) -> Result<Option<String>, JobQueueError> {
        let mut guard = self.blocking.lock().await;
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| JobQueueError::Unavailable(e.to_string()))?,
        };

        let result = if wait.is_zero() {
            redis::cmd("LMOVE")
                .arg(&self.keys.waiting)
                .arg(&self.keys.active)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async::<Option<String>>(&mut conn)
                .await
        } else {
            redis::cmd("BLMOVE")
                .arg(&self.keys.waiting)
                .arg(&self.keys.active)
                .arg("RIGHT")
                .arg("LEFT")
                .arg(format!("{:.3}", wait.as_secs_f64()))
                .query_async::<Option<String>>(&mut conn)
                .await
        };

        // A failed connection is dropped and reopened on the next call.
        let id = result.map_err(map_redis_error)?;
        *guard = Some(conn);
        Ok(id)
    }
}

#[async_trait]
impl BackendQueue for RedisQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, payload: Value) -> Result<JobInstance, JobQueueError> {
        let job = JobInstance::new(&self.name, payload);
        let id = job.id.to_string();
        let body = serde_json::to_string(&job)?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&self.keys.jobs)
            .arg(&id)
            .arg(body)
            .ignore()
            .cmd("LPUSH")
            .arg(&self.keys.waiting)
            .arg(&id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(job)
    }

    async fn lease(&self, wait: Duration) -> Result<Option<Lease>, JobQueueError> {
        self.maintain().await?;

        let Some(id) = self.pop_waiting(wait).await? else {
            return Ok(None);
        };

        let token = Uuid::new_v4();
        let expires_at = utc_after(self.policy.lease_timeout);
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.claim.prepare_invoke();
        for key in self.keys.all() {
            invocation.key(key);
        }
        let claimed: Option<(String, u32)> = match invocation
            .arg(&id)
            .arg(token.to_string())
            .arg(millis(expires_at))
            .invoke_async(&mut conn)
            .await
        {
            Ok(claimed) => claimed,
            Err(e) => {
                self.release(&id).await;
                return Err(map_redis_error(e));
            }
        };

        let Some((body, attempts)) = claimed else {
            tracing::warn!(queue = %self.name, job_id = %id, "popped id could not be claimed; skipped");
            return Ok(None);
        };

        let mut job: JobInstance = serde_json::from_str(&body)?;
        job.attempts = attempts;
        Ok(Some(Lease {
            job,
            token,
            expires_at,
        }))
    }

    async fn ack(&self, lease: &Lease) -> Result<(), JobQueueError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.ack.prepare_invoke();
        for key in self.keys.all() {
            invocation.key(key);
        }
        let acked: i64 = invocation
            .arg(lease.job.id.to_string())
            .arg(lease.token.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        if acked == 1 {
            Ok(())
        } else {
            Err(JobQueueError::LeaseLost(lease.job.id))
        }
    }

    async fn fail(&self, lease: &Lease, error: &str) -> Result<FailureDisposition, JobQueueError> {
        let delay = self.policy.retry.backoff.delay(lease.job.attempts);
        let retry_at = utc_after(delay);

        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.fail.prepare_invoke();
        for key in self.keys.all() {
            invocation.key(key);
        }
        let outcome: i64 = invocation
            .arg(lease.job.id.to_string())
            .arg(lease.token.to_string())
            .arg(self.policy.retry.max_attempts)
            .arg(millis(retry_at))
            .arg(error)
            .arg(millis(Utc::now()))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        match outcome {
            1 => Ok(FailureDisposition::Retrying { retry_at }),
            0 => Ok(FailureDisposition::DeadLettered),
            _ => Err(JobQueueError::LeaseLost(lease.job.id)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobSnapshot>, JobQueueError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.get.prepare_invoke();
        for key in self.keys.all() {
            invocation.key(key);
        }
        let found: Option<(String, String, String, String)> = invocation
            .arg(id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        let Some((body, attempts, state, last_error)) = found else {
            return Ok(None);
        };

        let mut job: JobInstance = serde_json::from_str(&body)?;
        job.attempts = attempts.parse().unwrap_or_default();
        let state: JobState = state.parse().map_err(JobQueueError::Backend)?;

        Ok(Some(JobSnapshot {
            job,
            state,
            last_error: (!last_error.is_empty()).then_some(last_error),
        }))
    }

    async fn counts(&self) -> Result<QueueCounts, JobQueueError> {
        self.maintain().await?;

        let mut conn = self.conn.clone();
        let (waiting, active, delayed, failed): (usize, usize, usize, usize) = redis::pipe()
            .cmd("LLEN")
            .arg(&self.keys.waiting)
            .cmd("LLEN")
            .arg(&self.keys.active)
            .cmd("ZCARD")
            .arg(&self.keys.delayed)
            .cmd("LLEN")
            .arg(&self.keys.failed)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(QueueCounts {
            waiting,
            active,
            delayed,
            failed,
        })
    }
}
