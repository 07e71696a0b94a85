//! In-process queue backend.
//!
//! Jobs live in memory only, so they do not survive a restart. Leasing, lease
//! expiry, retry backoff and dead-lettering follow the same rules as the Redis
//! backend, which makes this backend suitable for tests and single-process setups.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::{utc_after, BackendQueue, QueueBackend};
use crate::error::JobQueueError;
use crate::policy::QueuePolicy;
use crate::types::{FailureDisposition, JobInstance, JobSnapshot, JobState, Lease, QueueCounts};

/// Maximum number of dead-lettered jobs kept per queue.
const MAX_FAILED_JOBS: usize = 1000;

/// Used when a deadline would overflow the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Backend keeping every queue in process memory.
pub struct MemoryBackend {
    policy: QueuePolicy,
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("policy", &self.policy)
            .field("queues", &"<Mutex<HashMap<String, Arc<MemoryQueue>>>>")
            .finish()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(QueuePolicy::default())
    }
}

impl MemoryBackend {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            policy,
            queues: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn open_queue(&self, name: &str) -> Result<Arc<dyn BackendQueue>, JobQueueError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let queue = queues
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(MemoryQueue::new(name, self.policy)))
            .clone();
        Ok(queue)
    }
}

#[derive(Debug)]
struct Entry {
    job: JobInstance,
    state: JobState,
    last_error: Option<String>,
    /// Lease token and expiry while active.
    lease: Option<(Uuid, Instant)>,
    /// When a delayed job becomes leasable.
    ready_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<Uuid, Entry>,
    waiting: VecDeque<Uuid>,
    delayed: HashSet<Uuid>,
    active: HashSet<Uuid>,
    /// Dead-lettered job IDs (oldest first).
    failed: VecDeque<Uuid>,
}

impl QueueState {
    /// Park a job in the failed set, maintaining the size limit.
    fn dead_letter(&mut self, id: Uuid) {
        self.failed.push_back(id);
        while self.failed.len() > MAX_FAILED_JOBS {
            if let Some(old_id) = self.failed.pop_front() {
                self.jobs.remove(&old_id);
            }
        }
    }

    /// Remove the lease from an active job if `token` still owns it.
    fn release(&mut self, id: Uuid, token: Uuid) -> Option<&mut Entry> {
        let owned = matches!(
            self.jobs.get(&id),
            Some(Entry { state: JobState::Active, lease: Some((held, _)), .. }) if *held == token
        );
        if !owned {
            return None;
        }
        self.active.remove(&id);
        let entry = self.jobs.get_mut(&id)?;
        entry.lease = None;
        Some(entry)
    }
}

struct MemoryQueue {
    name: String,
    policy: QueuePolicy,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl MemoryQueue {
    fn new(name: &str, policy: QueuePolicy) -> Self {
        Self {
            name: name.to_owned(),
            policy,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Promote due delayed jobs and reclaim expired leases.
    ///
    /// Returns the next instant at which this needs to run again, if any.
    fn maintain(&self, state: &mut QueueState, now: Instant) -> Option<Instant> {
        let mut next_due: Option<Instant> = None;
        let mut track = |at: Instant| {
            next_due = Some(next_due.map_or(at, |current| current.min(at)));
        };

        let mut due = Vec::new();
        for id in &state.delayed {
            match state.jobs.get(id).and_then(|e| e.ready_at) {
                Some(at) if at > now => track(at),
                _ => due.push(*id),
            }
        }
        for id in due {
            state.delayed.remove(&id);
            if let Some(entry) = state.jobs.get_mut(&id) {
                entry.state = JobState::Waiting;
                entry.ready_at = None;
                state.waiting.push_back(id);
            }
        }

        let mut expired = Vec::new();
        for id in &state.active {
            match state.jobs.get(id).and_then(|e| e.lease) {
                Some((_, deadline)) if deadline > now => track(deadline),
                _ => expired.push(*id),
            }
        }
        for id in expired {
            state.active.remove(&id);
            let Some(entry) = state.jobs.get_mut(&id) else {
                continue;
            };
            entry.lease = None;
            if self.policy.retry.allows_retry(entry.job.attempts) {
                tracing::warn!(queue = %self.name, job_id = %id, "lease expired; requeueing job");
                entry.state = JobState::Waiting;
                state.waiting.push_front(id);
            } else {
                tracing::warn!(queue = %self.name, job_id = %id, "lease expired; retry budget exhausted");
                entry.state = JobState::Failed;
                entry.last_error = Some("lease expired".to_string());
                state.dead_letter(id);
            }
        }

        next_due
    }

    fn take_next(&self, state: &mut QueueState) -> Option<Lease> {
        while let Some(id) = state.waiting.pop_front() {
            let Some(entry) = state.jobs.get_mut(&id) else {
                continue;
            };
            let token = Uuid::new_v4();
            let now = Instant::now();
            let deadline = now
                .checked_add(self.policy.lease_timeout)
                .unwrap_or_else(|| now + FAR_FUTURE);

            entry.job.attempts += 1;
            entry.state = JobState::Active;
            entry.lease = Some((token, deadline));
            let job = entry.job.clone();
            state.active.insert(id);

            return Some(Lease {
                job,
                token,
                expires_at: utc_after(self.policy.lease_timeout),
            });
        }
        None
    }
}

#[async_trait]
impl BackendQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, payload: Value) -> Result<JobInstance, JobQueueError> {
        let job = JobInstance::new(&self.name, payload);
        {
            let mut state = self.lock();
            state.waiting.push_back(job.id);
            state.jobs.insert(
                job.id,
                Entry {
                    job: job.clone(),
                    state: JobState::Waiting,
                    last_error: None,
                    lease: None,
                    ready_at: None,
                },
            );
        }
        self.notify.notify_waiters();
        Ok(job)
    }

    async fn lease(&self, wait: Duration) -> Result<Option<Lease>, JobQueueError> {
        let start = Instant::now();
        let end = start.checked_add(wait).unwrap_or_else(|| start + FAR_FUTURE);

        loop {
            // Register interest before inspecting state so a push in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.lock();
                let next_due = self.maintain(&mut state, Instant::now());
                if let Some(lease) = self.take_next(&mut state) {
                    return Ok(Some(lease));
                }
                next_due
            };

            if Instant::now() >= end {
                return Ok(None);
            }
            let wake = next_due.map_or(end, |due| due.min(end));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), JobQueueError> {
        let mut state = self.lock();
        let id = lease.job.id;
        if state.release(id, lease.token).is_none() {
            return Err(JobQueueError::LeaseLost(id));
        }
        state.jobs.remove(&id);
        Ok(())
    }

    async fn fail(&self, lease: &Lease, error: &str) -> Result<FailureDisposition, JobQueueError> {
        let id = lease.job.id;
        let retry = self.policy.retry;

        let disposition = {
            let mut state = self.lock();
            let entry = state
                .release(id, lease.token)
                .ok_or(JobQueueError::LeaseLost(id))?;
            entry.last_error = Some(error.to_owned());

            if !retry.allows_retry(entry.job.attempts) {
                entry.state = JobState::Failed;
                state.dead_letter(id);
                FailureDisposition::DeadLettered
            } else {
                let delay = retry.backoff.delay(entry.job.attempts);
                if delay.is_zero() {
                    entry.state = JobState::Waiting;
                    state.waiting.push_back(id);
                } else {
                    let now = Instant::now();
                    entry.state = JobState::Delayed;
                    entry.ready_at = Some(now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE));
                    state.delayed.insert(id);
                }
                FailureDisposition::Retrying {
                    retry_at: utc_after(delay),
                }
            }
        };

        // Waiting leases recompute their wake-up time.
        self.notify.notify_waiters();
        Ok(disposition)
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobSnapshot>, JobQueueError> {
        let mut state = self.lock();
        self.maintain(&mut state, Instant::now());
        Ok(state.jobs.get(&id).map(|entry| JobSnapshot {
            job: entry.job.clone(),
            state: entry.state,
            last_error: entry.last_error.clone(),
        }))
    }

    async fn counts(&self) -> Result<QueueCounts, JobQueueError> {
        let mut state = self.lock();
        self.maintain(&mut state, Instant::now());
        Ok(QueueCounts {
            waiting: state.waiting.len(),
            active: state.active.len(),
            delayed: state.delayed.len(),
            failed: state.failed.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Backoff, RetryPolicy};
    use serde_json::json;

    fn policy(max_attempts: u32, backoff: Backoff, lease_timeout: Duration) -> QueuePolicy {
        QueuePolicy {
            lease_timeout,
            retry: RetryPolicy {
                max_attempts,
                backoff,
            },
        }
    }

    async fn open(policy: QueuePolicy) -> Arc<dyn BackendQueue> {
        MemoryBackend::new(policy).open_queue("test").await.unwrap()
    }

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_push_lease_ack_removes_job() {
        let queue = open(QueuePolicy::default()).await;
        let job = queue.push(json!({"n": 1})).await.unwrap();
        assert_eq!(job.attempts, 0);

        let lease = queue.lease(SHORT).await.unwrap().expect("leased");
        assert_eq!(lease.job.id, job.id);
        assert_eq!(lease.job.attempts, 1);
        assert_eq!(
            queue.get(job.id).await.unwrap().unwrap().state,
            JobState::Active
        );

        queue.ack(&lease).await.unwrap();
        assert!(queue.get(job.id).await.unwrap().is_none());
        assert_eq!(queue.counts().await.unwrap(), QueueCounts::default());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = open(QueuePolicy::default()).await;
        let first = queue.push(json!(1)).await.unwrap();
        let second = queue.push(json!(2)).await.unwrap();

        assert_eq!(queue.lease(SHORT).await.unwrap().unwrap().job.id, first.id);
        assert_eq!(queue.lease(SHORT).await.unwrap().unwrap().job.id, second.id);
    }

    #[tokio::test]
    async fn test_lease_times_out_when_empty() {
        let queue = open(QueuePolicy::default()).await;
        assert!(queue.lease(SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_waiting_lease_wakes_on_push() {
        let queue = open(QueuePolicy::default()).await;
        let consumer = queue.clone();
        let waiter = tokio::spawn(async move { consumer.lease(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = queue.push(json!({})).await.unwrap();

        let lease = waiter.await.unwrap().unwrap().expect("woken by push");
        assert_eq!(lease.job.id, job.id);
    }

    #[tokio::test]
    async fn test_fail_with_retry_budget_requeues() {
        let queue = open(policy(3, Backoff::Immediate, Duration::from_secs(30))).await;
        let job = queue.push(json!({"user": "ana"})).await.unwrap();

        let lease = queue.lease(SHORT).await.unwrap().unwrap();
        let disposition = queue.fail(&lease, "network down").await.unwrap();
        assert!(matches!(disposition, FailureDisposition::Retrying { .. }));

        let snapshot = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, JobState::Waiting);
        assert_eq!(snapshot.last_error.as_deref(), Some("network down"));

        let again = queue.lease(SHORT).await.unwrap().unwrap();
        assert_eq!(again.job.id, job.id);
        assert_eq!(again.job.payload, job.payload);
        assert_eq!(again.job.attempts, 2);
    }

    #[tokio::test]
    async fn test_fail_with_backoff_delays_job() {
        let queue = open(policy(
            3,
            Backoff::Fixed(Duration::from_millis(80)),
            Duration::from_secs(30),
        ))
        .await;
        let job = queue.push(json!({})).await.unwrap();
        let lease = queue.lease(SHORT).await.unwrap().unwrap();
        queue.fail(&lease, "boom").await.unwrap();

        assert_eq!(queue.counts().await.unwrap().delayed, 1);
        assert!(queue.lease(SHORT).await.unwrap().is_none());

        let again = queue
            .lease(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("delayed job becomes leasable");
        assert_eq!(again.job.id, job.id);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let queue = open(policy(1, Backoff::Immediate, Duration::from_secs(30))).await;
        let job = queue.push(json!({})).await.unwrap();
        let lease = queue.lease(SHORT).await.unwrap().unwrap();

        let disposition = queue.fail(&lease, "fatal").await.unwrap();
        assert_eq!(disposition, FailureDisposition::DeadLettered);

        let snapshot = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, JobState::Failed);
        assert!(queue.lease(SHORT).await.unwrap().is_none());
        assert_eq!(queue.counts().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let queue = open(policy(3, Backoff::Immediate, Duration::from_millis(30))).await;
        let job = queue.push(json!({"n": 7})).await.unwrap();

        let first = queue.lease(SHORT).await.unwrap().unwrap();
        let second = queue
            .lease(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("redelivered after lease timeout");
        assert_eq!(second.job.id, job.id);
        assert_eq!(second.job.attempts, 2);

        // The first worker lost its lease.
        assert!(matches!(
            queue.ack(&first).await,
            Err(JobQueueError::LeaseLost(id)) if id == job.id
        ));
        queue.ack(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_reflects_expired_lease() {
        let queue = open(policy(3, Backoff::Immediate, Duration::from_millis(20))).await;
        let job = queue.push(json!({})).await.unwrap();
        let _stalled = queue.lease(SHORT).await.unwrap().unwrap();
        assert_eq!(queue.get(job.id).await.unwrap().unwrap().state, JobState::Active);

        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(snapshot.state, JobState::Waiting);
        assert_eq!(snapshot.job.attempts, 1);
        let counts = queue.counts().await.unwrap();
        assert_eq!((counts.waiting, counts.active), (1, 0));
    }

    #[tokio::test]
    async fn test_expired_lease_without_budget_is_dead_lettered() {
        let queue = open(policy(1, Backoff::Immediate, Duration::from_millis(10))).await;
        let job = queue.push(json!({})).await.unwrap();
        let _lease = queue.lease(SHORT).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.active, 0);

        let snapshot = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(snapshot.last_error.as_deref(), Some("lease expired"));
    }

    #[tokio::test]
    async fn test_same_name_shares_queue() {
        let backend = MemoryBackend::default();
        let producer = backend.open_queue("shared").await.unwrap();
        let consumer = backend.open_queue("shared").await.unwrap();

        let job = producer.push(json!({})).await.unwrap();
        assert_eq!(consumer.lease(SHORT).await.unwrap().unwrap().job.id, job.id);
    }

    #[test]
    fn test_dead_letter_history_is_bounded() {
        let mut state = QueueState::default();
        for _ in 0..(MAX_FAILED_JOBS + 5) {
            let job = JobInstance::new("q", json!({}));
            let id = job.id;
            state.jobs.insert(
                id,
                Entry {
                    job,
                    state: JobState::Failed,
                    last_error: None,
                    lease: None,
                    ready_at: None,
                },
            );
            state.dead_letter(id);
        }
        assert_eq!(state.failed.len(), MAX_FAILED_JOBS);
        assert_eq!(state.jobs.len(), MAX_FAILED_JOBS);
    }
}
