//! Job execution: the queue interface, an in-process worker pool and a
//! recording dispatcher.

mod args;
mod context;
mod dispatcher;
mod job;
mod memory;
mod queue;
mod retry_policy;

pub use args::JobArgs;
pub use context::JobContext;
pub use dispatcher::{DispatchError, JobDispatcher, JobHandle};
pub use job::{JobError, JobSet, QueuedJob};
pub use memory::{InMemoryDispatcher, SubmittedJob};
pub use queue::{JobQueue, JobWorker};
pub use retry_policy::RetryPolicy;
