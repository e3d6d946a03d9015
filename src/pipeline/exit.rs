//! Process exit codes for a batch run

use super::summary::{exceeds_tolerance, RunSummary};
use super::PipelineError;
use crate::store::StoreError;

/// Every record finished within the failure tolerance.
pub const EXIT_OK: i32 = 0;
/// The run stopped early or left too many failures; `--resume` continues it.
pub const EXIT_INCOMPLETE: i32 = 1;
/// Bad input, configuration or credentials. Nothing useful was done.
pub const EXIT_STARTUP: i32 = 2;
/// Checkpoint or output storage failed during the run.
pub const EXIT_STORAGE: i32 = 3;
/// Second interrupt: the operator asked to stop without draining.
pub const EXIT_FORCED: i32 = 130;

/// Exit code for a run that aborted with `error`.
pub fn exit_code_for_error(error: &PipelineError) -> i32 {
    match error {
        e if e.is_startup() => EXIT_STARTUP,
        PipelineError::Checkpoint(_) | PipelineError::Store(StoreError::Io(_) | StoreError::Csv(_)) => EXIT_STORAGE,
        _ => EXIT_INCOMPLETE,
    }
}

/// Exit code for a run that returned normally.
///
/// `failed` counts failed ids across the whole checkpoint, not just this run.
pub fn run_exit_code(summary: &RunSummary, failed: usize, total: usize, tolerance: f64) -> i32 {
    if summary.cancelled || summary.interrupted > 0 {
        return EXIT_INCOMPLETE;
    }
    if exceeds_tolerance(failed, total, tolerance) {
        return EXIT_INCOMPLETE;
    }
    EXIT_OK
}
