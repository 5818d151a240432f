//! Per-type mutation event source.
//!
//! The store fires one event per data mutation: after a write, before and
//! after a delete, and after a many-to-many relation change. Observers are
//! connected for a single type label and only see events for that type.

use super::trait_def::CommitHooks;
use crate::jobs::DispatchError;
use crate::model::{Entity, EntityRef, PropagationKind, RelationChange, TypeLabel};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

/// Error raised by an observer while capturing a mutation.
///
/// It propagates to the code performing the mutation and aborts it.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to dispatch {kind} propagation for {entity}: {source}")]
    Dispatch {
        kind: PropagationKind,
        entity: EntityRef,
        #[source]
        source: DispatchError,
    },

    #[error("Observer for {expected} received an event for {actual}")]
    TypeMismatch {
        expected: TypeLabel,
        actual: TypeLabel,
    },
}

/// Receives mutation events for the type it was connected to.
///
/// `tx` is the enclosing transaction, `None` when the mutation already
/// committed on its own.
pub trait MutationObserver: Send + Sync {
    fn on_write(&self, instance: &Entity, tx: Option<&dyn CommitHooks>)
        -> Result<(), CaptureError>;

    fn on_pre_delete(
        &self,
        instance: &Entity,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError>;

    fn on_post_delete(
        &self,
        instance: &Entity,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError>;

    fn on_relation_change(
        &self,
        instance: &Entity,
        change: RelationChange,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    observer: Arc<dyn MutationObserver>,
}

#[derive(Default)]
pub struct MutationSignals {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<TypeLabel, Vec<Subscription>>>,
}

impl MutationSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect an observer to the events of one type.
    pub fn connect(
        &self,
        type_label: TypeLabel,
        observer: Arc<dyn MutationObserver>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!("Connecting mutation observer {:?} for {}", id, type_label);
        let mut subscribers = self.subscribers.write().unwrap();
        subscribers
            .entry(type_label)
            .or_default()
            .push(Subscription { id, observer });
        id
    }

    /// Disconnect a previously connected observer. Returns false if it was not connected.
    pub fn disconnect(&self, type_label: &TypeLabel, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap();
        let Some(list) = subscribers.get_mut(type_label) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(type_label);
        }
        removed
    }

    pub fn subscriber_count(&self, type_label: &TypeLabel) -> usize {
        self.subscribers
            .read()
            .unwrap()
            .get(type_label)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.read().unwrap().is_empty()
    }

    // Observers are collected first so none of them runs under the lock.
    fn observers_for(&self, type_label: &TypeLabel) -> Vec<Arc<dyn MutationObserver>> {
        self.subscribers
            .read()
            .unwrap()
            .get(type_label)
            .map(|list| list.iter().map(|s| Arc::clone(&s.observer)).collect())
            .unwrap_or_default()
    }

    pub fn send_write(
        &self,
        instance: &Entity,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        for observer in self.observers_for(instance.type_label()) {
            observer.on_write(instance, tx)?;
        }
        Ok(())
    }

    pub fn send_pre_delete(
        &self,
        instance: &Entity,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        for observer in self.observers_for(instance.type_label()) {
            observer.on_pre_delete(instance, tx)?;
        }
        Ok(())
    }

    pub fn send_post_delete(
        &self,
        instance: &Entity,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        for observer in self.observers_for(instance.type_label()) {
            observer.on_post_delete(instance, tx)?;
        }
        Ok(())
    }

    pub fn send_relation_change(
        &self,
        instance: &Entity,
        change: RelationChange,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        for observer in self.observers_for(instance.type_label()) {
            observer.on_relation_change(instance, change, tx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl MutationObserver for RecordingObserver {
        fn on_write(
            &self,
            instance: &Entity,
            _tx: Option<&dyn CommitHooks>,
        ) -> Result<(), CaptureError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("write {}", instance.entity_ref));
            Ok(())
        }

        fn on_pre_delete(
            &self,
            instance: &Entity,
            _tx: Option<&dyn CommitHooks>,
        ) -> Result<(), CaptureError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("pre_delete {}", instance.entity_ref));
            Ok(())
        }

        fn on_post_delete(
            &self,
            instance: &Entity,
            _tx: Option<&dyn CommitHooks>,
        ) -> Result<(), CaptureError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("post_delete {}", instance.entity_ref));
            Ok(())
        }

        fn on_relation_change(
            &self,
            instance: &Entity,
            change: RelationChange,
            _tx: Option<&dyn CommitHooks>,
        ) -> Result<(), CaptureError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("relation {} {}", change, instance.entity_ref));
            Ok(())
        }
    }

    fn article() -> TypeLabel {
        TypeLabel::new("blog", "Article")
    }

    #[test]
    fn test_events_reach_only_observers_of_that_type() {
        let signals = MutationSignals::new();
        let article_observer = Arc::new(RecordingObserver::default());
        let tag_observer = Arc::new(RecordingObserver::default());
        signals.connect(article(), article_observer.clone());
        signals.connect(TypeLabel::new("blog", "Tag"), tag_observer.clone());

        let entity = Entity::new(article(), 1);
        signals.send_write(&entity, None).unwrap();
        signals.send_pre_delete(&entity, None).unwrap();
        signals
            .send_relation_change(&entity, RelationChange::Add, None)
            .unwrap();

        assert_eq!(
            *article_observer.events.lock().unwrap(),
            vec![
                "write blog.Article#1",
                "pre_delete blog.Article#1",
                "relation add blog.Article#1"
            ]
        );
        assert!(tag_observer.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_disconnect_stops_delivery() {
        let signals = MutationSignals::new();
        let observer = Arc::new(RecordingObserver::default());
        let id = signals.connect(article(), observer.clone());
        assert_eq!(signals.subscriber_count(&article()), 1);

        assert!(signals.disconnect(&article(), id));
        assert!(!signals.disconnect(&article(), id));
        assert!(!signals.has_subscribers());

        signals
            .send_write(&Entity::new(article(), 1), None)
            .unwrap();
        assert!(observer.events.lock().unwrap().is_empty());
    }
}
