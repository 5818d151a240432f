//! Full-text search index the propagation jobs write into.

mod document;
mod fts5_index;

pub use document::{Document, EmbeddedEntry, IndexStats, SearchHit};
pub use fts5_index::Fts5SearchIndex;
