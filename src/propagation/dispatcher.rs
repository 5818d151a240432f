use crate::jobs::{DispatchError, JobArgs, JobDispatcher, JobHandle};
use crate::metrics;
use crate::model::PropagationRequest;
use crate::store::CommitHooks;
use std::sync::Arc;
use tracing::{debug, error};

/// Hands propagation requests to the job queue, holding write requests
/// back until their transaction commits.
#[derive(Clone)]
pub struct CommitDeferredDispatcher {
    queue: Arc<dyn JobDispatcher>,
}

impl CommitDeferredDispatcher {
    pub fn new(queue: Arc<dyn JobDispatcher>) -> Self {
        Self { queue }
    }

    /// Submit `request` once `tx` commits, or right away when there is no
    /// open transaction. A rolled back transaction drops the request.
    ///
    /// A submission failing after commit cannot undo the commit, so it is
    /// only logged and counted.
    pub fn defer_until_commit(
        &self,
        request: PropagationRequest,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), DispatchError> {
        let Some(tx) = tx else {
            metrics::record_propagation_request(request.kind.as_str(), "eager");
            return submit(self.queue.as_ref(), &request).map(|_| ());
        };

        metrics::record_propagation_request(request.kind.as_str(), "deferred");
        debug!("Deferring {} of {} until commit", request.kind, request.entity);
        let queue = Arc::clone(&self.queue);
        tx.on_commit(Box::new(move || {
            if let Err(e) = submit(queue.as_ref(), &request) {
                error!(
                    "Failed to enqueue {} of {} after commit: {}",
                    request.kind, request.entity, e
                );
                metrics::record_commit_dispatch_failure();
            }
        }));
        Ok(())
    }

    /// Submit `request` immediately.
    pub fn dispatch_now(&self, request: PropagationRequest) -> Result<JobHandle, DispatchError> {
        metrics::record_propagation_request(request.kind.as_str(), "eager");
        submit(self.queue.as_ref(), &request)
    }
}

fn submit(
    queue: &dyn JobDispatcher,
    request: &PropagationRequest,
) -> Result<JobHandle, DispatchError> {
    let args = JobArgs::for_entity(&request.entity).to_json();
    let handle = queue.enqueue(request.kind.job_name(), args)?;
    debug!(
        "Enqueued {} for {} as {}",
        handle.job_name, request.entity, handle.id
    );
    Ok(handle)
}
