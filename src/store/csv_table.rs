//! CSV input loading and atomic CSV output

use super::traits::{
    InputTable, RecordSink, StoreError, StoreResult, ABSTRACT_COLUMN, DATE_COLUMN, TITLE_COLUMN,
};
use crate::record::{normalize_date, InputRecord, LabeledRecord, Outcome, RecordId};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Columns appended to the input columns in the output table.
pub const OUTPUT_COLUMNS: [&str; 12] = [
    "id",
    "SP",
    "CU",
    "INT",
    "City",
    "Other_Location",
    "Actors",
    "Demands",
    "Action_Type",
    "status",
    "failureReason",
    "attempts",
];

/// Load an input table.
///
/// Fails with `StoreError::Schema` if `Title`, `Abstract` or `PubDate` is
/// missing, if an input column shares a name with an output column, or if
/// any row's date cannot be parsed.
pub fn load_csv(path: impl AsRef<Path>) -> StoreResult<InputTable> {
    let path = path.as_ref();
    let file = File::open(path)?;
    read_table(file)
}

fn read_table<R: std::io::Read>(reader: R) -> StoreResult<InputTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(false)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let column = |name: &str| -> StoreResult<usize> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| StoreError::Schema(format!("missing required column '{}'", name)))
    };
    if let Some(clash) = headers.iter().find(|h| OUTPUT_COLUMNS.contains(&h.as_str())) {
        return Err(StoreError::Schema(format!(
            "input column '{}' is reserved for labeling output; rename it",
            clash
        )));
    }
    let title_idx = column(TITLE_COLUMN)?;
    let abstract_idx = column(ABSTRACT_COLUMN)?;
    let date_idx = column(DATE_COLUMN)?;

    let mut rows = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result?;
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();

        let raw_date = field(date_idx);
        let pub_date = normalize_date(&raw_date).ok_or_else(|| {
            StoreError::Schema(format!(
                "row {}: cannot parse {} '{}'",
                row + 1,
                DATE_COLUMN,
                raw_date
            ))
        })?;

        let extra = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != title_idx && *i != abstract_idx && *i != date_idx)
            .map(|(i, h)| (h.clone(), field(i)))
            .collect();

        rows.push((field(title_idx), field(abstract_idx), pub_date, extra));
    }

    Ok(InputTable {
        headers,
        records: InputRecord::assign_ids(rows),
    })
}

/// CSV output table, upserted by record id.
///
/// Holds one row per input record, in source order. Records without an
/// outcome yet are written with status `pending`. Every flush writes a
/// temporary file and renames it over the target.
pub struct CsvSink {
    path: PathBuf,
    headers: Vec<String>,
    records: Vec<InputRecord>,
    outcomes: HashMap<RecordId, (Outcome, u32)>,
    flush_every: usize,
    unflushed: usize,
}

impl CsvSink {
    /// Create a sink for the given input table. Nothing is written until
    /// the first flush.
    pub fn create(path: impl Into<PathBuf>, table: &InputTable) -> Self {
        Self {
            path: path.into(),
            headers: table.headers.clone(),
            records: table.records.clone(),
            outcomes: HashMap::new(),
            flush_every: 25,
            unflushed: 0,
        }
    }

    /// Write the file after this many appended records.
    pub fn with_flush_every(mut self, n: usize) -> Self {
        self.flush_every = n.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn output_row(&self, record: &InputRecord) -> Vec<String> {
        let mut row: Vec<String> = self
            .headers
            .iter()
            .map(|h| match h.as_str() {
                TITLE_COLUMN => record.title.clone(),
                ABSTRACT_COLUMN => record.abstract_text.clone(),
                DATE_COLUMN => record.pub_date_iso(),
                other => record
                    .extra
                    .iter()
                    .find(|(name, _)| name == other)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default(),
            })
            .collect();

        row.push(record.id.to_string());
        match self.outcomes.get(&record.id) {
            Some((outcome, attempts)) => {
                row.extend(outcome_columns(outcome));
                row.push(attempts.to_string());
            }
            None => {
                row.extend(std::iter::repeat(String::new()).take(8));
                row.push("pending".to_string());
                row.push(String::new());
                row.push("0".to_string());
            }
        }
        row
    }

    fn write_table(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let file = File::create(&tmp)?;
            let mut writer = csv::Writer::from_writer(file);
            let header = self
                .headers
                .iter()
                .map(String::as_str)
                .chain(OUTPUT_COLUMNS.iter().copied());
            writer.write_record(header)?;
            for record in &self.records {
                writer.write_record(self.output_row(record))?;
            }
            let file = writer
                .into_inner()
                .map_err(|e| StoreError::Io(e.into_error()))?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// SP..status and failureReason columns for an outcome.
fn outcome_columns(outcome: &Outcome) -> Vec<String> {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    match outcome {
        Outcome::Succeeded { label } => vec![
            label.social_protest.code().to_string(),
            label.current_event.code().to_string(),
            label.scope.code().to_string(),
            opt(&label.city),
            opt(&label.other_location),
            opt(&label.actors),
            opt(&label.demands),
            opt(&label.action_type),
            outcome.status().to_string(),
            String::new(),
        ],
        Outcome::Failed { reason } => {
            let mut cols = vec![String::new(); 8];
            cols.push(outcome.status().to_string());
            cols.push(reason.to_string());
            cols
        }
        Outcome::Skipped { reason } => {
            let mut cols = vec![String::new(); 8];
            cols.push(outcome.status().to_string());
            cols.push(reason.clone());
            cols
        }
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, records: &[LabeledRecord]) -> StoreResult<()> {
        for labeled in records {
            self.outcomes
                .insert(labeled.id(), (labeled.outcome.clone(), labeled.attempts));
            self.unflushed += 1;
        }
        if self.unflushed >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.write_table()?;
        self.unflushed = 0;
        Ok(())
    }
}
