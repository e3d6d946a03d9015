//! Record store: input tables in, labeled tables out
//!
//! The primary implementation reads and writes CSV. Output tables are
//! keyed by record id and rewritten atomically, so incremental appends
//! are upserts and an interrupted write never truncates the table.

mod csv_table;
mod memory;
mod traits;

pub use csv_table::{load_csv, CsvSink, OUTPUT_COLUMNS};
pub use memory::MemorySink;
pub use traits::{InputTable, RecordSink, StoreError, StoreResult, ABSTRACT_COLUMN, DATE_COLUMN, TITLE_COLUMN};
