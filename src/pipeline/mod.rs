//! Batch annotation pipeline
//!
//! The orchestrator pulls not-yet-finished records from the checkpoint,
//! labels them through the oracle with bounded concurrency, validates each
//! reply, and merges outcomes back by record id.

mod exit;
mod orchestrator;
mod summary;

pub use exit::{
    exit_code_for_error, run_exit_code, EXIT_FORCED, EXIT_INCOMPLETE, EXIT_OK, EXIT_STARTUP, EXIT_STORAGE,
};
pub use orchestrator::BatchOrchestrator;
pub use summary::{exceeds_tolerance, Pricing, RunSummary};
pub use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::store::StoreError;
use thiserror::Error;

/// Errors that abort a whole run.
///
/// Per-record failures never appear here; they become `Outcome::Failed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("oracle authentication failed: {0}")]
    Auth(String),

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Errors caused by bad input, configuration or credentials, as opposed
    /// to storage failures during the run.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Schema(_)) | Self::Config(_) | Self::Auth(_)
        )
    }
}
