use super::dispatcher::CommitDeferredDispatcher;
use crate::model::{
    Entity, EntityRef, PropagationKind, PropagationRequest, RelationChange, TypeLabel,
};
use crate::store::{CaptureError, CommitHooks, MutationObserver};
use std::sync::Arc;
use tracing::debug;

/// Turns mutation events into propagation requests.
///
/// Writes and relation changes are deferred until commit, since their jobs
/// re-read the row. Unlink is submitted before the row goes away and delete
/// right after, both eagerly, as their jobs only carry the identity.
pub struct MutationCapture {
    dispatcher: CommitDeferredDispatcher,
}

impl MutationCapture {
    pub fn new(dispatcher: CommitDeferredDispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn on_write(
        &self,
        type_label: &TypeLabel,
        instance: &Entity,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        let request = PropagationRequest::write(reference(type_label, instance));
        let entity = request.entity.clone();
        self.dispatcher
            .defer_until_commit(request, tx)
            .map_err(|source| CaptureError::Dispatch {
                kind: PropagationKind::Write,
                entity,
                source,
            })
    }

    pub fn on_pre_delete(
        &self,
        type_label: &TypeLabel,
        instance: &Entity,
        _tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        self.dispatch_now(PropagationRequest::unlink(reference(type_label, instance)))
    }

    pub fn on_post_delete(
        &self,
        type_label: &TypeLabel,
        instance: &Entity,
        _tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        self.dispatch_now(PropagationRequest::delete(reference(type_label, instance)))
    }

    /// Handled as a write of `instance`, whatever the change was.
    pub fn on_many_to_many_change(
        &self,
        type_label: &TypeLabel,
        instance: &Entity,
        change: RelationChange,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        debug!("Relation {} on {}", change, instance.entity_ref);
        self.on_write(type_label, instance, tx)
    }

    fn dispatch_now(&self, request: PropagationRequest) -> Result<(), CaptureError> {
        let kind = request.kind;
        let entity = request.entity.clone();
        self.dispatcher
            .dispatch_now(request)
            .map(|_| ())
            .map_err(|source| CaptureError::Dispatch {
                kind,
                entity,
                source,
            })
    }

    /// An observer for one type, holding its own copy of the label.
    pub fn binding(self: &Arc<Self>, type_label: TypeLabel) -> TypeBinding {
        TypeBinding {
            type_label,
            capture: Arc::clone(self),
        }
    }
}

fn reference(type_label: &TypeLabel, instance: &Entity) -> EntityRef {
    EntityRef::new(type_label.clone(), instance.pk().clone())
}

/// Connects [`MutationCapture`] to the signals of a single type.
pub struct TypeBinding {
    type_label: TypeLabel,
    capture: Arc<MutationCapture>,
}

impl TypeBinding {
    pub fn type_label(&self) -> &TypeLabel {
        &self.type_label
    }

    fn check(&self, instance: &Entity) -> Result<(), CaptureError> {
        if instance.type_label() != &self.type_label {
            return Err(CaptureError::TypeMismatch {
                expected: self.type_label.clone(),
                actual: instance.type_label().clone(),
            });
        }
        Ok(())
    }
}

impl MutationObserver for TypeBinding {
    fn on_write(
        &self,
        instance: &Entity,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        self.check(instance)?;
        self.capture.on_write(&self.type_label, instance, tx)
    }

    fn on_pre_delete(
        &self,
        instance: &Entity,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        self.check(instance)?;
        self.capture.on_pre_delete(&self.type_label, instance, tx)
    }

    fn on_post_delete(
        &self,
        instance: &Entity,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        self.check(instance)?;
        self.capture.on_post_delete(&self.type_label, instance, tx)
    }

    fn on_relation_change(
        &self,
        instance: &Entity,
        change: RelationChange,
        tx: Option<&dyn CommitHooks>,
    ) -> Result<(), CaptureError> {
        self.check(instance)?;
        self.capture
            .on_many_to_many_change(&self.type_label, instance, change, tx)
    }
}
