//! Batch services built on the fetch client

pub mod batch;
pub mod store;
pub mod targets;

pub use batch::{BatchOperations, BatchRunner, BatchSummary};
pub use store::{ItemRecord, ResultStore, RESULTS_FILE};
pub use targets::{extract_targets, scan_links_dir, Target};
