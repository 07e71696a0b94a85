//! Queue manager: maps job names to backend queues and their executors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{BackendQueue, QueueBackend};
use crate::error::JobQueueError;
use crate::executor::JobExecutor;
use crate::registry::JobRegistry;
use crate::reporter::FailureReporter;
use crate::types::{JobInstance, JobSnapshot, QueueCounts};
use crate::worker::{Worker, WorkerOptions};

struct QueueBinding {
    queue: Arc<dyn BackendQueue>,
    executor: Arc<dyn JobExecutor>,
}

/// Owns one backend queue per registered job and the worker loops consuming them.
pub struct QueueManager {
    bindings: BTreeMap<String, QueueBinding>,
    reporter: Arc<FailureReporter>,
    processing: AtomicBool,
}

impl fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueManager")
            .field("queues", &self.bindings.keys().collect::<Vec<_>>())
            .field("reporter", &self.reporter)
            .field("processing", &self.is_processing())
            .finish()
    }
}

impl QueueManager {
    /// Open a backend queue for every registered job.
    ///
    /// Any failure to reach the backend is reported as [`JobQueueError::Unavailable`];
    /// no manager is returned in that case.
    pub async fn init(
        registry: JobRegistry,
        backend: &dyn QueueBackend,
        reporter: FailureReporter,
    ) -> Result<Self, JobQueueError> {
        let mut bindings = BTreeMap::new();

        for (name, executor) in registry.into_inner() {
            let queue = backend.open_queue(&name).await.map_err(|e| match e {
                JobQueueError::Unavailable(_) => e,
                other => JobQueueError::Unavailable(other.to_string()),
            })?;
            tracing::debug!(queue = %name, "opened job queue");
            bindings.insert(name, QueueBinding { queue, executor });
        }

        tracing::info!(queues = bindings.len(), "job queues initialized");

        Ok(Self {
            bindings,
            reporter: Arc::new(reporter),
            processing: AtomicBool::new(false),
        })
    }

    fn binding(&self, name: &str) -> Result<&QueueBinding, JobQueueError> {
        self.bindings
            .get(name)
            .ok_or_else(|| JobQueueError::UnknownJob(name.to_owned()))
    }

    /// Durably enqueue `payload` for the job registered under `name`.
    ///
    /// Resolves once the backend has stored the job; the executor is never run inline.
    pub async fn enqueue(&self, name: &str, payload: Value) -> Result<JobInstance, JobQueueError> {
        let binding = self.binding(name)?;
        let job = binding.queue.push(payload).await?;
        tracing::debug!(queue = %name, job_id = %job.id, "job enqueued");
        Ok(job)
    }

    /// Serialize `payload` and enqueue it.
    pub async fn enqueue_json<T: Serialize + ?Sized>(
        &self,
        name: &str,
        payload: &T,
    ) -> Result<JobInstance, JobQueueError> {
        self.binding(name)?;
        let payload = serde_json::to_value(payload)?;
        self.enqueue(name, payload).await
    }

    /// Look up a stored job. Returns `None` once the job has been acked.
    pub async fn job(&self, name: &str, id: Uuid) -> Result<Option<JobSnapshot>, JobQueueError> {
        self.binding(name)?.queue.get(id).await
    }

    pub async fn counts(&self, name: &str) -> Result<QueueCounts, JobQueueError> {
        self.binding(name)?.queue.counts().await
    }

    /// Registered job names in sorted order.
    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    #[inline]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Spawn one worker loop per registered job.
    ///
    /// May be called once per manager; later calls fail with
    /// [`JobQueueError::AlreadyProcessing`] and start nothing. Must be called from
    /// within a tokio runtime.
    pub fn start_processing(&self, options: WorkerOptions) -> Result<ProcessingHandle, JobQueueError> {
        if self.processing.swap(true, Ordering::AcqRel) {
            return Err(JobQueueError::AlreadyProcessing);
        }

        let shutdown = CancellationToken::new();
        let tasks = self
            .bindings
            .values()
            .map(|binding| {
                let worker = Worker::new(
                    binding.queue.clone(),
                    binding.executor.clone(),
                    self.reporter.clone(),
                    options,
                );
                tokio::spawn(worker.run(shutdown.child_token()))
            })
            .collect::<Vec<_>>();

        tracing::info!(workers = tasks.len(), "queue processing started");
        Ok(ProcessingHandle { shutdown, tasks })
    }
}

/// Running worker loops started by [`QueueManager::start_processing`].
#[derive(Debug)]
pub struct ProcessingHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ProcessingHandle {
    /// Signal shutdown and wait for every worker to finish its current job.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "worker task ended abnormally");
            }
        }
        tracing::info!("queue processing stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::executor::NoOpExecutor;
    use std::time::Duration;
    use userhub_error_tracking::DisabledTracker;

    fn reporter() -> FailureReporter {
        FailureReporter::new(Arc::new(DisabledTracker), false)
    }

    async fn manager(names: &[&str]) -> QueueManager {
        let mut registry = JobRegistry::new();
        for name in names {
            registry.register(NoOpExecutor::new(*name)).unwrap();
        }
        QueueManager::init(registry, &MemoryBackend::default(), reporter())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_init_opens_queue_per_job() {
        let manager = manager(&["b", "a"]).await;
        assert_eq!(manager.job_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(!manager.is_processing());
    }

    #[tokio::test]
    async fn test_enqueue_unknown_job_fails() {
        let manager = manager(&["UpdateUserMail"]).await;
        let err = manager
            .enqueue("DeleteUser", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, JobQueueError::UnknownJob(ref name) if name == "DeleteUser"));
        assert_eq!(
            manager.counts("UpdateUserMail").await.unwrap(),
            QueueCounts::default()
        );
    }

    #[tokio::test]
    async fn test_enqueue_persists_without_running_executor() {
        let manager = manager(&["UpdateUserMail"]).await;
        let job = manager
            .enqueue_json("UpdateUserMail", &serde_json::json!({"user": {"name": "Ana"}}))
            .await
            .unwrap();

        assert_eq!(job.queue, "UpdateUserMail");
        assert_eq!(manager.counts("UpdateUserMail").await.unwrap().waiting, 1);
        assert!(manager.job("UpdateUserMail", job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_start_processing_twice_fails() {
        let manager = manager(&["UpdateUserMail"]).await;
        let options = WorkerOptions {
            poll_interval: Duration::from_millis(20),
            ..WorkerOptions::default()
        };

        let handle = manager.start_processing(options).unwrap();
        assert!(manager.is_processing());
        assert!(matches!(
            manager.start_processing(options),
            Err(JobQueueError::AlreadyProcessing)
        ));
        handle.shutdown().await;
    }
}
