use super::context::JobContext;
use crate::model::UnknownType;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors that can occur during job execution.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid job arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    UnknownType(#[from] UnknownType),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Job was cancelled")]
    Cancelled,
}

impl JobError {
    /// Whether running the job again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::ExecutionFailed(_))
    }
}

/// A job the queue can run by name.
///
/// Jobs are executed synchronously in a blocking context and may run more
/// than once for the same arguments, so every implementation must be
/// idempotent.
pub trait QueuedJob: Send + Sync {
    /// Name the job is enqueued under.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn execute(&self, ctx: &JobContext, args: &JsonValue) -> Result<(), JobError>;
}

/// Jobs known to a queue, by name.
#[derive(Clone, Default)]
pub struct JobSet {
    jobs: BTreeMap<&'static str, Arc<dyn QueuedJob>>,
}

impl JobSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: Arc<dyn QueuedJob>) {
        info!("Registering job: {} - {}", job.name(), job.description());
        self.jobs.insert(job.name(), job);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn QueuedJob>> {
        self.jobs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.jobs.keys().copied().collect()
    }

    /// Run a job right away on the calling thread.
    pub fn execute(&self, name: &str, ctx: &JobContext, args: &JsonValue) -> Result<(), JobError> {
        let job = self
            .get(name)
            .ok_or_else(|| JobError::NotFound(name.to_string()))?;
        job.execute(ctx, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_execution_failures_are_retryable() {
        assert!(JobError::ExecutionFailed("boom".into()).is_retryable());
        assert!(!JobError::NotFound("x".into()).is_retryable());
        assert!(!JobError::InvalidArguments("x".into()).is_retryable());
        assert!(!JobError::UnknownType(UnknownType("a.b".into())).is_retryable());
        assert!(!JobError::Cancelled.is_retryable());
    }

    #[test]
    fn test_unknown_type_message() {
        let err: JobError = UnknownType("blog.Nope".into()).into();
        assert_eq!(err.to_string(), "Unknown type: blog.Nope");
    }
}
