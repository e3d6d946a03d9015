//! In-memory record sink, used by tests and dry runs

use super::traits::{RecordSink, StoreResult};
use crate::record::{LabeledRecord, RecordId};
use std::collections::HashMap;

/// Keeps labeled records in a map keyed by id.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: HashMap<RecordId, LabeledRecord>,
    appends: usize,
    flushes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &RecordId) -> Option<&LabeledRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records sorted by source row.
    pub fn records(&self) -> Vec<&LabeledRecord> {
        let mut out: Vec<_> = self.records.values().collect();
        out.sort_by_key(|r| r.record.row);
        out
    }

    /// Number of `append` calls, counting each record once.
    pub fn append_count(&self) -> usize {
        self.appends
    }

    pub fn flush_count(&self) -> usize {
        self.flushes
    }
}

impl RecordSink for MemorySink {
    fn append(&mut self, records: &[LabeledRecord]) -> StoreResult<()> {
        for record in records {
            self.appends += 1;
            self.records.insert(record.id(), record.clone());
        }
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.flushes += 1;
        Ok(())
    }
}
