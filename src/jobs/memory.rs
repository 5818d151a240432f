//! Dispatcher that records submissions instead of running them.

use super::context::JobContext;
use super::dispatcher::{DispatchError, JobDispatcher, JobHandle};
use super::job::{JobError, JobSet};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedJob {
    /// Submission order, starting at 0.
    pub sequence: u64,
    pub handle: JobHandle,
    pub args: JsonValue,
}

impl SubmittedJob {
    pub fn job_name(&self) -> &str {
        &self.handle.job_name
    }
}

/// Records every submission in order and runs them on demand.
///
/// Used to observe exactly what the capture side hands to the queue and
/// to execute jobs in a chosen order.
#[derive(Default)]
pub struct InMemoryDispatcher {
    next_sequence: AtomicU64,
    closed: AtomicBool,
    history: Mutex<Vec<SubmittedJob>>,
    pending: Mutex<VecDeque<SubmittedJob>>,
}

impl InMemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every further submission with [`DispatchError::QueueClosed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Every submission so far, in order.
    pub fn submitted(&self) -> Vec<SubmittedJob> {
        self.history.lock().unwrap().clone()
    }

    /// Job names of every submission so far, in order.
    pub fn submitted_names(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .map(|job| job.handle.job_name.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Remove and return the submissions not run yet.
    pub fn take_pending(&self) -> Vec<SubmittedJob> {
        self.pending.lock().unwrap().drain(..).collect()
    }

    /// Run every pending submission in submission order, including the ones
    /// submitted while running. Returns each job with its outcome.
    pub fn run_pending(
        &self,
        jobs: &JobSet,
        ctx: &JobContext,
    ) -> Vec<(SubmittedJob, Result<(), JobError>)> {
        let mut outcomes = Vec::new();
        loop {
            let next = self.pending.lock().unwrap().pop_front();
            let Some(job) = next else {
                break;
            };
            let result = jobs.execute(job.job_name(), ctx, &job.args);
            outcomes.push((job, result));
        }
        outcomes
    }
}

impl JobDispatcher for InMemoryDispatcher {
    fn enqueue(&self, job_name: &str, args: JsonValue) -> Result<JobHandle, DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::QueueClosed);
        }
        let submitted = SubmittedJob {
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            handle: JobHandle::new(job_name),
            args,
        };
        let handle = submitted.handle.clone();
        self.history.lock().unwrap().push(submitted.clone());
        self.pending.lock().unwrap().push_back(submitted);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_in_order() {
        let dispatcher = InMemoryDispatcher::new();
        dispatcher.enqueue("unlink", json!({"pk": "1"})).unwrap();
        dispatcher.enqueue("apply-delete", json!({"pk": "1"})).unwrap();

        let submitted = dispatcher.submitted();
        assert_eq!(submitted[0].sequence, 0);
        assert_eq!(submitted[1].sequence, 1);
        assert_eq!(dispatcher.submitted_names(), vec!["unlink", "apply-delete"]);

        assert_eq!(dispatcher.take_pending().len(), 2);
        assert_eq!(dispatcher.pending_count(), 0);
        // History is kept
        assert_eq!(dispatcher.submitted().len(), 2);
    }

    #[test]
    fn test_closed_refuses_submissions() {
        let dispatcher = InMemoryDispatcher::new();
        dispatcher.close();
        assert_eq!(
            dispatcher.enqueue("unlink", JsonValue::Null).unwrap_err(),
            DispatchError::QueueClosed
        );
        assert!(dispatcher.submitted().is_empty());
    }
}
