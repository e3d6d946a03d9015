//! Checkpoint trait definitions

use crate::pipeline::RunSummary;
use crate::record::{LabeledRecord, RecordId, RecordStatus, StoredOutcome};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during checkpoint operations.
///
/// Any of these is fatal to a run: without durable progress the pipeline
/// could lose records or pay for them twice.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt checkpoint row: {0}")]
    Corrupt(String),
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// One entry of the run log.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: i64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub total: usize,
    /// Highest progress sequence number written when the run finished.
    pub last_sequence: Option<i64>,
    pub summary: Option<serde_json::Value>,
}

/// Trait for durable progress stores
///
/// Implementations must be thread-safe (Send + Sync). Every write must be
/// durable when the call returns.
pub trait ProgressStore: Send + Sync {
    /// Status of every id seen so far.
    ///
    /// Ids left in flight by an interrupted run have already been reverted
    /// to pending when the store was opened.
    fn load_progress(&self) -> CheckpointResult<HashMap<RecordId, RecordStatus>>;

    /// Mark an id as dispatched to the oracle.
    fn mark_in_flight(&self, id: &RecordId) -> CheckpointResult<()>;

    /// Return an id to pending without recording an outcome.
    fn revert_to_pending(&self, id: &RecordId) -> CheckpointResult<()>;

    /// Durably record a finished record's outcome.
    fn record_progress(&self, labeled: &LabeledRecord) -> CheckpointResult<()>;

    /// All stored outcomes (succeeded, failed, skipped).
    fn completed_records(&self) -> CheckpointResult<Vec<StoredOutcome>>;

    /// Ids from `all_ids` that still need the oracle, in the given order.
    /// Succeeded and skipped ids are excluded; failed ids are retried.
    fn remaining_work(&self, all_ids: &[RecordId]) -> CheckpointResult<Vec<RecordId>> {
        let progress = self.load_progress()?;
        Ok(all_ids
            .iter()
            .filter(|id| !progress.get(*id).is_some_and(|s| s.is_final()))
            .copied()
            .collect())
    }

    /// Count of ids per status.
    fn status_counts(&self) -> CheckpointResult<HashMap<RecordStatus, usize>> {
        let mut counts = HashMap::new();
        for status in self.load_progress()?.into_values() {
            *counts.entry(status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Open a run log entry, returning its id.
    fn begin_run(&self, total: usize) -> CheckpointResult<i64>;

    /// Close a run log entry with its summary.
    fn finish_run(&self, run_id: i64, summary: &RunSummary) -> CheckpointResult<()>;

    /// The run log, oldest first.
    fn runs(&self) -> CheckpointResult<Vec<RunRecord>>;
}

/// Extension trait for opening checkpoints from paths
pub trait OpenCheckpoint: ProgressStore + Sized {
    /// Open or create a checkpoint at the given path
    fn open(path: impl AsRef<Path>) -> CheckpointResult<Self>;

    /// Create an in-memory checkpoint (useful for testing)
    fn open_in_memory() -> CheckpointResult<Self>;
}
