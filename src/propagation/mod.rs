//! Change propagation from store mutations to the search index.

mod capture;
mod dispatcher;
mod handlers;
mod processor;
mod rebuild;

pub use capture::{MutationCapture, TypeBinding};
pub use dispatcher::CommitDeferredDispatcher;
pub use handlers::{propagation_jobs, ApplyDeleteJob, ApplyWriteJob, UnlinkJob};
pub use processor::{ProcessorError, SignalProcessor};
pub use rebuild::enqueue_rebuild;
