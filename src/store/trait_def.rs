//! Traits the propagation core consumes from the data store.

use crate::model::{Entity, EntityRef, TypeLabel};
use anyhow::Result;

/// Read access to stored entities by reference.
pub trait EntitySource: Send + Sync {
    /// Fetch an entity with its relations, `None` if it does not exist.
    fn fetch(&self, entity: &EntityRef) -> Result<Option<Entity>>;

    /// All stored entities of a type.
    fn list(&self, type_label: &TypeLabel) -> Result<Vec<Entity>>;

    /// Entities holding a relation to `target`, whether or not `target` exists.
    fn owners_of(&self, target: &EntityRef) -> Result<Vec<EntityRef>>;
}

pub type CommitCallback = Box<dyn FnOnce() + Send>;

/// Commit hook registration offered by an open transaction.
///
/// A registered callback runs exactly once if and only if the transaction
/// commits. Callbacks of a rolled back transaction are dropped unrun.
pub trait CommitHooks {
    fn on_commit(&self, callback: CommitCallback);
}
