//! Search Index Sync Library
//!
//! Keeps a full-text search index eventually consistent with an entity store
//! by turning store mutations into idempotent propagation jobs.

pub mod config;
pub mod jobs;
pub mod metrics;
pub mod model;
pub mod propagation;
pub mod registry;
pub mod search;
pub mod sqlite_persistence;
pub mod store;

// Re-export commonly used types for convenience
pub use jobs::{InMemoryDispatcher, JobDispatcher, JobQueue};
pub use model::{Entity, EntityRef, TypeLabel};
pub use propagation::{propagation_jobs, SignalProcessor};
pub use registry::{IndexRegistry, RegistryClient};
pub use search::Fts5SearchIndex;
pub use store::SqliteStore;
