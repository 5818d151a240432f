//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{article_ref, TestHarness, ARTICLE_42};
//!
//! #[test]
//! fn test_index_article() {
//!     let harness = TestHarness::new();
//!     harness.create_article(ARTICLE_42, "Title", &[]);
//!     harness.run_jobs();
//!     assert!(harness.document(&article_ref(ARTICLE_42)).is_some());
//! }
//! ```

mod constants;
mod fixtures;
mod harness;

// Public API - this is what tests import
pub use constants::*;
pub use fixtures::*;
pub use harness::TestHarness;
