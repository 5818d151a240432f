use crate::model::{Entity, EntityRef, TypeLabel, UnknownType};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No indexed document for {0}")]
    DocumentNotFound(EntityRef),

    #[error("Failed to read {entity} from the store: {source}")]
    Source {
        entity: EntityRef,
        #[source]
        source: anyhow::Error,
    },

    #[error("Index operation failed: {0}")]
    Index(#[from] anyhow::Error),
}

/// Knows how data-model instances map onto index documents.
pub trait RegistryClient: Send + Sync {
    /// Every type that owns a document or is embedded by one.
    fn tracked_types(&self) -> BTreeSet<TypeLabel>;

    /// Index (or re-index) the document of `instance`. Untracked types are a no-op.
    fn upsert(&self, instance: &Entity) -> Result<(), RegistryError>;

    /// Re-index the documents that embed `instance`.
    fn upsert_related(&self, instance: &Entity) -> Result<(), RegistryError>;

    /// Remove the document of `entity`. A missing document is only an error
    /// when `raise_on_error` is set.
    fn remove(&self, entity: &EntityRef, raise_on_error: bool) -> Result<(), RegistryError>;

    /// Drop `entity` from every document that embeds it.
    fn remove_related(&self, entity: &EntityRef) -> Result<(), RegistryError>;
}

/// Resolves serialized type labels to known types.
pub trait TypeRegistry: Send + Sync {
    fn resolve(&self, type_label: &str) -> Result<TypeLabel, UnknownType>;
}
