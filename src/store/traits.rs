//! Record store trait definitions

use crate::record::{InputRecord, LabeledRecord};
use thiserror::Error;

pub const TITLE_COLUMN: &str = "Title";
pub const ABSTRACT_COLUMN: &str = "Abstract";
pub const DATE_COLUMN: &str = "PubDate";

/// Errors that can occur reading or writing record tables
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input table does not have the required shape. Fatal at load time.
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for record store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A loaded input table: the source header order plus its records.
#[derive(Debug, Clone)]
pub struct InputTable {
    pub headers: Vec<String>,
    pub records: Vec<InputRecord>,
}

impl InputTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Destination for labeled records.
///
/// `append` must be safe to call repeatedly with overlapping ids: the last
/// write for an id wins. Failed records are written with their reason.
pub trait RecordSink: Send {
    /// Upsert labeled records by id.
    fn append(&mut self, records: &[LabeledRecord]) -> StoreResult<()>;

    /// Force all appended records to durable storage.
    fn flush(&mut self) -> StoreResult<()>;
}
