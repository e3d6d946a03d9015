//! Eventcoder: LLM batch annotation for protest-event coding
//!
//! Labels newspaper records (title, abstract, publication date) with a fixed
//! event-coding taxonomy by querying an instruction-following language
//! model, and merges the labels back into the input table.
//!
//! # Core Concepts
//!
//! - **Records**: input rows with a content-derived id, stable across runs
//! - **Oracle**: the model endpoint, asked once per record
//! - **Outcomes**: succeeded with a validated label, failed with a reason,
//!   or skipped, one per record and never mixed
//! - **Checkpoint**: durable per-record progress so runs can be resumed
//!   without paying for a record twice
//!
//! # Example
//!
//! ```
//! use eventcoder::{label_json, BatchOrchestrator, MockOracle};
//! use std::sync::Arc;
//!
//! let oracle = Arc::new(MockOracle::new().with_default_reply(label_json(1, 1, 1, None)));
//! let orchestrator = BatchOrchestrator::new(oracle).with_concurrency(4);
//! // Orchestrator is ready to run over a record table
//! # let _ = orchestrator;
//! ```

pub mod checkpoint;
pub mod config;
pub mod oracle;
pub mod pipeline;
mod record;
pub mod store;
pub mod validate;

pub use checkpoint::{CheckpointError, OpenCheckpoint, ProgressStore, SqliteCheckpoint};
pub use config::{ConfigError, PipelineConfig};
pub use oracle::{
    label_json, MockOracle, OpenAiOracle, OpenAiSettings, OracleClient, OracleError, PromptTemplate, RateGate,
    RetryPolicy,
};
pub use pipeline::{
    exceeds_tolerance, exit_code_for_error, run_exit_code, BatchOrchestrator, CancellationToken, PipelineError, Pricing,
    RunSummary, EXIT_FORCED, EXIT_INCOMPLETE, EXIT_OK, EXIT_STARTUP, EXIT_STORAGE,
};
pub use record::{
    normalize_date, CurrentEvent, FailureKind, FailureReason, GeographicScope, InputRecord, Label, LabeledRecord,
    Outcome, RecordId, RecordStatus, SocialProtest, StoredOutcome,
};
pub use store::{load_csv, CsvSink, InputTable, MemorySink, RecordSink, StoreError};
pub use validate::{SchemaValidator, ValidationError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
