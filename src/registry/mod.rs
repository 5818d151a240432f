//! Mapping of data-model instances onto index documents.

mod client;
mod index_registry;
mod mapping;
mod model_types;

pub use client::{RegistryClient, RegistryError, TypeRegistry};
pub use index_registry::IndexRegistry;
pub use mapping::{DocumentMapping, EmbedMapping};
pub use model_types::ModelTypes;
