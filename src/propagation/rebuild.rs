use super::dispatcher::CommitDeferredDispatcher;
use crate::model::{PropagationRequest, TypeLabel};
use crate::store::EntitySource;
use anyhow::{Context, Result};
use tracing::info;

/// Enqueue an `apply-write` for every stored entity of the given types.
///
/// Returns the number of jobs enqueued.
pub fn enqueue_rebuild<'a>(
    source: &dyn EntitySource,
    document_types: impl IntoIterator<Item = &'a TypeLabel>,
    dispatcher: &CommitDeferredDispatcher,
) -> Result<usize> {
    let mut enqueued = 0;
    for type_label in document_types {
        let entities = source
            .list(type_label)
            .with_context(|| format!("Failed to list {}", type_label))?;
        info!("Rebuilding {} {} documents", entities.len(), type_label);
        for entity in entities {
            dispatcher
                .dispatch_now(PropagationRequest::write(entity.entity_ref))
                .with_context(|| format!("Failed to enqueue rebuild of {}", type_label))?;
            enqueued += 1;
        }
    }
    Ok(enqueued)
}
