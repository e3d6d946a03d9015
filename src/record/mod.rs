//! Record data model
//!
//! Input records are created once at load time and never mutated. Every
//! record ends a run with exactly one [`Outcome`], paired by [`RecordId`].

mod input;
mod label;
mod outcome;

pub use input::{normalize_date, InputRecord, RecordId};
pub use label::{CurrentEvent, GeographicScope, Label, SocialProtest};
pub use outcome::{FailureKind, FailureReason, LabeledRecord, Outcome, RecordStatus, StoredOutcome};
