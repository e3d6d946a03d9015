//! Per-record outcomes
//!
//! An outcome is a tagged sum: a record either succeeded with a full label,
//! failed with an explicit reason, or was skipped. There is no "empty label".

use super::input::{InputRecord, RecordId};
use super::label::Label;
use serde::{Deserialize, Serialize};

/// Category of a per-record failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Oracle answered, but not with a conforming label.
    InvalidSchema,
    /// Timeouts, rate limits or server errors outlasted the retry budget.
    TransientExhausted,
    /// Oracle permanently refused the request.
    OracleRejected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSchema => "invalidSchema",
            Self::TransientExhausted => "transientExhausted",
            Self::OracleRejected => "oracleRejected",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record failed. `detail` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub detail: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let detail = if detail.trim().is_empty() {
            "no detail reported".to_string()
        } else {
            detail
        };
        Self { kind, detail }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Final outcome of labeling one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Outcome {
    Succeeded { label: Label },
    Failed { reason: FailureReason },
    Skipped { reason: String },
}

impl Outcome {
    pub fn failed(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::Failed {
            reason: FailureReason::new(kind, detail),
        }
    }

    pub fn status(&self) -> RecordStatus {
        match self {
            Self::Succeeded { .. } => RecordStatus::Succeeded,
            Self::Failed { .. } => RecordStatus::Failed,
            Self::Skipped { .. } => RecordStatus::Skipped,
        }
    }

    pub fn label(&self) -> Option<&Label> {
        match self {
            Self::Succeeded { label } => Some(label),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Checkpoint status of a record id.
///
/// `Pending → InFlight → {Succeeded, Failed, Skipped}`. A failed record goes
/// back through `InFlight` on a later run; succeeded and skipped are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    Skipped,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "inFlight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "inFlight" => Some(Self::InFlight),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Final statuses are never dispatched again.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An input record merged with its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRecord {
    pub record: InputRecord,
    pub outcome: Outcome,
    /// Oracle attempts spent on this record in the run that produced `outcome`.
    pub attempts: u32,
}

impl LabeledRecord {
    pub fn id(&self) -> RecordId {
        self.record.id
    }
}

/// An outcome as persisted in the checkpoint, without the input fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOutcome {
    pub id: RecordId,
    pub outcome: Outcome,
    pub attempts: u32,
}
