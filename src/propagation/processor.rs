use super::capture::MutationCapture;
use super::dispatcher::CommitDeferredDispatcher;
use crate::jobs::JobDispatcher;
use crate::model::TypeLabel;
use crate::registry::RegistryClient;
use crate::store::{MutationSignals, SubscriptionId};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("Signal processor is already set up")]
    AlreadyActive,
}

/// Connects mutation capture to the signals of every tracked type.
pub struct SignalProcessor {
    signals: Arc<MutationSignals>,
    capture: Arc<MutationCapture>,
    tracked_types: BTreeSet<TypeLabel>,
    /// `Some` while active.
    subscriptions: Mutex<Option<Vec<(TypeLabel, SubscriptionId)>>>,
}

impl SignalProcessor {
    /// The tracked types are read from `registry` once, here.
    pub fn new(
        signals: Arc<MutationSignals>,
        registry: &dyn RegistryClient,
        queue: Arc<dyn JobDispatcher>,
    ) -> Self {
        let capture = MutationCapture::new(CommitDeferredDispatcher::new(queue));
        Self {
            signals,
            capture: Arc::new(capture),
            tracked_types: registry.tracked_types(),
            subscriptions: Mutex::new(None),
        }
    }

    pub fn tracked_types(&self) -> &BTreeSet<TypeLabel> {
        &self.tracked_types
    }

    /// Subscribe a binding for every tracked type.
    pub fn setup(&self) -> Result<(), ProcessorError> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if subscriptions.is_some() {
            return Err(ProcessorError::AlreadyActive);
        }

        let mut connected = Vec::with_capacity(self.tracked_types.len());
        for type_label in &self.tracked_types {
            let binding = Arc::new(self.capture.binding(type_label.clone()));
            let id = self.signals.connect(type_label.clone(), binding);
            connected.push((type_label.clone(), id));
        }
        info!(
            "Signal processor set up for {} tracked types",
            connected.len()
        );
        *subscriptions = Some(connected);
        Ok(())
    }

    /// Unsubscribe every binding. Does nothing when not set up.
    pub fn teardown(&self) {
        let Some(connected) = self.subscriptions.lock().unwrap().take() else {
            debug!("Signal processor teardown while not set up");
            return;
        };
        for (type_label, id) in &connected {
            self.signals.disconnect(type_label, *id);
        }
        info!("Signal processor torn down ({} bindings)", connected.len());
    }

    pub fn is_active(&self) -> bool {
        self.subscriptions.lock().unwrap().is_some()
    }
}

impl Drop for SignalProcessor {
    fn drop(&mut self) {
        self.teardown();
    }
}
