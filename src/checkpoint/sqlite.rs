//! SQLite checkpoint backend

use super::traits::{CheckpointError, CheckpointResult, OpenCheckpoint, ProgressStore, RunRecord};
use crate::pipeline::RunSummary;
use crate::record::{LabeledRecord, Outcome, RecordId, RecordStatus, StoredOutcome};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// SQLite-backed progress store
///
/// One row per record id plus a run log. Thread-safe via an internal mutex
/// on the connection, so all writes are serialized. Every write commits
/// with `synchronous = FULL` before returning.
pub struct SqliteCheckpoint {
    conn: Mutex<Connection>,
}

impl SqliteCheckpoint {
    fn init_schema(conn: &Connection) -> CheckpointResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS progress (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                outcome_json TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                sequence INTEGER,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_progress_status
                ON progress(status);

            CREATE TABLE IF NOT EXISTS runs (
                run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                total INTEGER NOT NULL,
                last_sequence INTEGER,
                summary_json TEXT
            );

            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            "#,
        )?;
        Ok(())
    }

    /// Return ids left in flight by a crashed run to pending.
    fn revert_in_flight(conn: &Connection) -> CheckpointResult<usize> {
        let reverted = conn.execute(
            "UPDATE progress SET status = ?1, updated_at = ?2 WHERE status = ?3",
            params![
                RecordStatus::Pending.as_str(),
                Utc::now().to_rfc3339(),
                RecordStatus::InFlight.as_str()
            ],
        )?;
        if reverted > 0 {
            info!(reverted, "reverted interrupted in-flight records to pending");
        }
        Ok(reverted)
    }

    fn from_connection(conn: Connection) -> CheckpointResult<Self> {
        Self::init_schema(&conn)?;
        Self::revert_in_flight(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing checkpoint for reporting.
    ///
    /// Unlike [`OpenCheckpoint::open`] this never creates the file, never
    /// reverts in-flight rows, and rejects writes, so it is safe to run
    /// while another process is labeling against the same checkpoint.
    pub fn open_read_only(path: impl AsRef<Path>) -> CheckpointResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn parse_id(raw: &str) -> CheckpointResult<RecordId> {
        RecordId::parse(raw).ok_or_else(|| CheckpointError::Corrupt(format!("bad record id '{}'", raw)))
    }

    fn parse_time(raw: &str) -> CheckpointResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| CheckpointError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
    }

    fn set_status(&self, id: &RecordId, status: RecordStatus) -> CheckpointResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO progress (id, status, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
            params![id.to_string(), status.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl OpenCheckpoint for SqliteCheckpoint {
    fn open(path: impl AsRef<Path>) -> CheckpointResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> CheckpointResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

impl ProgressStore for SqliteCheckpoint {
    fn load_progress(&self) -> CheckpointResult<HashMap<RecordId, RecordStatus>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, status FROM progress")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut progress = HashMap::new();
        for row in rows {
            let (id, status) = row?;
            let status = RecordStatus::parse(&status)
                .ok_or_else(|| CheckpointError::Corrupt(format!("bad status '{}' for {}", status, id)))?;
            progress.insert(Self::parse_id(&id)?, status);
        }
        Ok(progress)
    }

    fn mark_in_flight(&self, id: &RecordId) -> CheckpointResult<()> {
        self.set_status(id, RecordStatus::InFlight)
    }

    fn revert_to_pending(&self, id: &RecordId) -> CheckpointResult<()> {
        self.set_status(id, RecordStatus::Pending)
    }

    fn record_progress(&self, labeled: &LabeledRecord) -> CheckpointResult<()> {
        let outcome_json = serde_json::to_string(&labeled.outcome)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO progress (id, status, outcome_json, attempts, sequence, updated_at)
            VALUES (?1, ?2, ?3, ?4, (SELECT COALESCE(MAX(sequence), 0) + 1 FROM progress), ?5)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                outcome_json = excluded.outcome_json,
                attempts = excluded.attempts,
                sequence = excluded.sequence,
                updated_at = excluded.updated_at
            "#,
            params![
                labeled.id().to_string(),
                labeled.outcome.status().as_str(),
                outcome_json,
                labeled.attempts,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn completed_records(&self) -> CheckpointResult<Vec<StoredOutcome>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, outcome_json, attempts FROM progress
            WHERE status IN (?1, ?2, ?3) AND outcome_json IS NOT NULL
            ORDER BY sequence
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                RecordStatus::Succeeded.as_str(),
                RecordStatus::Failed.as_str(),
                RecordStatus::Skipped.as_str()
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            },
        )?;

        let mut out = Vec::new();
        for row in rows {
            let (id, outcome_json, attempts) = row?;
            let outcome: Outcome = serde_json::from_str(&outcome_json)?;
            out.push(StoredOutcome {
                id: Self::parse_id(&id)?,
                outcome,
                attempts,
            });
        }
        Ok(out)
    }

    fn begin_run(&self, total: usize) -> CheckpointResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs (started_at, total) VALUES (?1, ?2)",
            params![Utc::now().to_rfc3339(), total as i64],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn finish_run(&self, run_id: i64, summary: &RunSummary) -> CheckpointResult<()> {
        let summary_json = serde_json::to_string(summary)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE runs SET
                finished_at = ?1,
                last_sequence = (SELECT MAX(sequence) FROM progress),
                summary_json = ?2
            WHERE run_id = ?3
            "#,
            params![Utc::now().to_rfc3339(), summary_json, run_id],
        )?;
        Ok(())
    }

    fn runs(&self) -> CheckpointResult<Vec<RunRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT run_id, started_at, finished_at, total, last_sequence, summary_json FROM runs ORDER BY run_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (run_id, started_at, finished_at, total, last_sequence, summary_json) = row?;
            out.push(RunRecord {
                run_id,
                started_at: Self::parse_time(&started_at)?,
                finished_at: finished_at.as_deref().map(Self::parse_time).transpose()?,
                total: total as usize,
                last_sequence,
                summary: summary_json
                    .as_deref()
                    .map(serde_json::from_str::<serde_json::Value>)
                    .transpose()?,
            });
        }
        Ok(out)
    }
}
