use crate::registry::{RegistryClient, TypeRegistry};
use crate::store::EntitySource;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Applies index changes.
    pub registry: Arc<dyn RegistryClient>,

    /// Resolves the type labels carried in job arguments.
    pub types: Arc<dyn TypeRegistry>,

    /// Committed store state, re-read by write jobs.
    pub source: Arc<dyn EntitySource>,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        registry: Arc<dyn RegistryClient>,
        types: Arc<dyn TypeRegistry>,
        source: Arc<dyn EntitySource>,
    ) -> Self {
        Self {
            cancellation_token,
            registry,
            types,
            source,
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
