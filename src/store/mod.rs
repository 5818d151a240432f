//! Relational entity store, its transactions and mutation signals.

mod schema;
mod signals;
mod sqlite_store;
mod trait_def;
mod transaction;

pub use signals::{CaptureError, MutationObserver, MutationSignals, SubscriptionId};
pub use sqlite_store::SqliteStore;
pub use trait_def::{CommitCallback, CommitHooks, EntitySource};
pub use transaction::StoreTransaction;
