//! Checkpoint/resume for batch runs
//!
//! Durable per-record progress so an interrupted run can resume without
//! re-labeling finished records. The primary implementation is
//! `SqliteCheckpoint`.

mod sqlite;
mod traits;

pub use sqlite::SqliteCheckpoint;
pub use traits::{CheckpointError, CheckpointResult, OpenCheckpoint, ProgressStore, RunRecord};
