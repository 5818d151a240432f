//! The three propagation jobs.
//!
//! All of them may run more than once and in any order relative to each
//! other, so each one only converges the index toward the current state.

use crate::jobs::{JobArgs, JobContext, JobError, JobSet, QueuedJob};
use crate::model::{EntityRef, PropagationKind};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, warn};

/// Decode the arguments and resolve their type.
fn target_of(ctx: &JobContext, args: &JsonValue) -> Result<EntityRef, JobError> {
    let args = JobArgs::from_json(args)?;
    let type_label = ctx.types.resolve(&args.type_label)?;
    if ctx.is_cancelled() {
        return Err(JobError::Cancelled);
    }
    Ok(EntityRef::new(type_label, args.pk))
}

/// Re-reads the entity and re-indexes it and the documents embedding it.
pub struct ApplyWriteJob;

impl QueuedJob for ApplyWriteJob {
    fn name(&self) -> &'static str {
        PropagationKind::Write.job_name()
    }

    fn description(&self) -> &'static str {
        "Index the committed state of an entity and refresh documents embedding it"
    }

    fn execute(&self, ctx: &JobContext, args: &JsonValue) -> Result<(), JobError> {
        let entity = target_of(ctx, args)?;

        let instance = match ctx.source.fetch(&entity) {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                // Deleted since the write, the delete jobs take care of it
                debug!("{} no longer exists, nothing to index", entity);
                return Ok(());
            }
            Err(e) => {
                return Err(JobError::ExecutionFailed(format!(
                    "Failed to read {}: {:#}",
                    entity, e
                )))
            }
        };

        ctx.registry
            .upsert(&instance)
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        ctx.registry
            .upsert_related(&instance)
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        debug!("Indexed {}", entity);
        Ok(())
    }
}

/// Removes a deleted entity from the documents embedding it.
pub struct UnlinkJob;

impl QueuedJob for UnlinkJob {
    fn name(&self) -> &'static str {
        PropagationKind::Unlink.job_name()
    }

    fn description(&self) -> &'static str {
        "Drop a deleted entity from every document that embeds it"
    }

    fn execute(&self, ctx: &JobContext, args: &JsonValue) -> Result<(), JobError> {
        let entity = target_of(ctx, args)?;
        if let Err(e) = ctx.registry.remove_related(&entity) {
            warn!("Failed to unlink {}: {}", entity, e);
        }
        Ok(())
    }
}

/// Removes the document of a deleted entity.
pub struct ApplyDeleteJob;

impl QueuedJob for ApplyDeleteJob {
    fn name(&self) -> &'static str {
        PropagationKind::Delete.job_name()
    }

    fn description(&self) -> &'static str {
        "Remove the document of a deleted entity"
    }

    fn execute(&self, ctx: &JobContext, args: &JsonValue) -> Result<(), JobError> {
        let entity = target_of(ctx, args)?;
        if let Err(e) = ctx.registry.remove(&entity, false) {
            warn!("Failed to remove document of {}: {}", entity, e);
        }
        Ok(())
    }
}

/// A job set with the three propagation jobs registered.
pub fn propagation_jobs() -> JobSet {
    let mut jobs = JobSet::new();
    jobs.register(Arc::new(ApplyWriteJob));
    jobs.register(Arc::new(UnlinkJob));
    jobs.register(Arc::new(ApplyDeleteJob));
    jobs
}
