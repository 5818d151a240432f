use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Job queue is closed")]
    QueueClosed,

    #[error("No job registered as {0}")]
    UnknownJob(String),
}

/// Receipt for an enqueued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: Uuid,
    pub job_name: String,
}

impl JobHandle {
    pub fn new(job_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
        }
    }
}

/// At-least-once asynchronous job submission.
///
/// `enqueue` must not block: it is called from inside data mutations and
/// from commit callbacks.
pub trait JobDispatcher: Send + Sync {
    fn enqueue(&self, job_name: &str, args: JsonValue) -> Result<JobHandle, DispatchError>;
}
