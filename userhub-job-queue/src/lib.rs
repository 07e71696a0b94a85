//! Named job queues for the UserHub backend.
//!
//! Slow side effects (sending mail after a profile update) are pushed onto a named
//! queue by the request path and executed later by a worker loop. Delivery is
//! at-least-once: a job that fails or whose worker stalls is handed out again by the
//! backend until its retry budget runs out, after which it is dead-lettered.
//!
//! # Architecture
//!
//! - [`JobRegistry`] - startup-time set of [`JobExecutor`]s, one per job name
//! - [`QueueManager`] - opens one backend queue per job, enqueues and starts workers
//! - [`QueueBackend`] - storage for queues ([`MemoryBackend`], `RedisBackend`)
//! - [`FailureReporter`] - logs handler failures and forwards them to error tracking
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use userhub_error_tracking::DisabledTracker;
//! use userhub_job_queue::{
//!     async_trait, FailureReporter, HandlerError, JobExecutor, JobInstance, JobRegistry,
//!     MemoryBackend, QueueManager, WorkerOptions,
//! };
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl JobExecutor for Greeter {
//!     fn job_type(&self) -> &str {
//!         "greet"
//!     }
//!
//!     async fn execute(&self, job: &JobInstance) -> Result<(), HandlerError> {
//!         println!("hello {}", job.payload["name"]);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = JobRegistry::new();
//!     registry.register(Greeter)?;
//!
//!     let reporter = FailureReporter::new(Arc::new(DisabledTracker), true);
//!     let manager = QueueManager::init(registry, &MemoryBackend::default(), reporter).await?;
//!
//!     let handle = manager.start_processing(WorkerOptions::default())?;
//!     manager.enqueue("greet", json!({"name": "Ana"})).await?;
//!
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

mod backend;
mod error;
mod executor;
mod manager;
mod policy;
mod registry;
mod reporter;
mod types;
mod worker;

#[cfg(feature = "redis")]
pub use backend::RedisBackend;
pub use backend::{BackendQueue, MemoryBackend, QueueBackend};
pub use error::{HandlerError, JobQueueError};
pub use executor::{JobExecutor, NoOpExecutor};
pub use manager::{ProcessingHandle, QueueManager};
pub use policy::{Backoff, QueuePolicy, RetryPolicy};
pub use registry::JobRegistry;
pub use reporter::FailureReporter;
pub use types::{
    FailureDisposition, JobInstance, JobMeta, JobSnapshot, JobState, Lease, QueueCounts,
};
pub use worker::WorkerOptions;

// Re-export async_trait for convenience when implementing JobExecutor
pub use async_trait::async_trait;
