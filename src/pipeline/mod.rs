//! Pipeline entry points for engine operations.
//!
//! - `BatchCrawler::perform_batch`: one resumable slice of a site crawl
//! - `DiffClassifier::generate_diff`: categorized diff between two stored versions
//! - `handle_invocation`: request dispatch for scheduled runs

pub mod batch;
pub mod diff;
pub mod invoke;
pub mod retention;

pub use batch::{BatchCrawler, max_safe_batch_size};
pub use diff::{DiffClassifier, DiffInput, classify, limit_changes};
pub use invoke::{Action, InvocationRequest, handle_invocation};
pub use retention::RetentionReport;
