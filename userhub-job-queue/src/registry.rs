//! Startup-time registry of job definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::JobQueueError;
use crate::executor::JobExecutor;

/// The set of job definitions known to a process.
///
/// Built once at startup and handed to [`crate::QueueManager::init`], which takes
/// ownership; no definitions can be added after that.
#[derive(Default)]
pub struct JobRegistry {
    executors: BTreeMap<String, Arc<dyn JobExecutor>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its job type.
    pub fn register<E: JobExecutor + 'static>(&mut self, executor: E) -> Result<(), JobQueueError> {
        self.register_arc(Arc::new(executor))
    }

    /// Register an executor that is already shared.
    pub fn register_arc(&mut self, executor: Arc<dyn JobExecutor>) -> Result<(), JobQueueError> {
        let job_type = executor.job_type().to_owned();
        if self.executors.contains_key(&job_type) {
            return Err(JobQueueError::DuplicateJob(job_type));
        }
        tracing::debug!(job = %job_type, "registered job executor");
        self.executors.insert(job_type, executor);
        Ok(())
    }

    #[inline]
    pub fn get(&self, job_type: &str) -> Option<&Arc<dyn JobExecutor>> {
        self.executors.get(job_type)
    }

    #[inline]
    pub fn contains(&self, job_type: &str) -> bool {
        self.executors.contains_key(job_type)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Registered job names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }

    pub(crate) fn into_inner(self) -> BTreeMap<String, Arc<dyn JobExecutor>> {
        self.executors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::NoOpExecutor;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = JobRegistry::new();
        registry.register(NoOpExecutor::new("b.job")).unwrap();
        registry.register(NoOpExecutor::new("a.job")).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a.job"));
        assert!(registry.get("b.job").is_some());
        assert!(registry.get("c.job").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a.job", "b.job"]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = JobRegistry::new();
        registry.register(NoOpExecutor::new("UpdateUserMail")).unwrap();

        let err = registry
            .register(NoOpExecutor::new("UpdateUserMail"))
            .unwrap_err();
        assert!(matches!(err, JobQueueError::DuplicateJob(ref name) if name == "UpdateUserMail"));
        assert!(err.is_configuration());
        assert_eq!(registry.len(), 1);
    }
}
