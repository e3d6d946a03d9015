//! Batch orchestrator: bounded-concurrency labeling with resumable progress
//!
//! For each record the checkpoint does not mark as finished:
//! 1. Mark it in flight (durably)
//! 2. Classify through the oracle (retry + shared rate gate)
//! 3. Validate the reply into a label, or a failure reason
//! 4. Record the outcome in the checkpoint, then append it to the sink
//!
//! Workers run as tokio tasks, at most `concurrency_limit` at a time.
//! Only the collector loop writes to the checkpoint and the sink.

use super::CancellationToken;
use super::summary::{Pricing, RunSummary};
use super::PipelineError;
use crate::checkpoint::ProgressStore;
use crate::config::PipelineConfig;
use crate::oracle::{OracleClient, OracleError, RateGate, RetryPolicy, TokenUsage};
use crate::record::{FailureKind, InputRecord, LabeledRecord, Outcome, RecordId};
use crate::store::RecordSink;
use crate::validate::SchemaValidator;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Read-only state shared by all workers.
struct WorkerContext {
    client: Arc<dyn OracleClient>,
    validator: SchemaValidator,
    retry: RetryPolicy,
    gate: Arc<RateGate>,
    cancel: CancellationToken,
}

enum WorkerResult {
    Finished(Outcome),
    /// The oracle rejected our credentials; the run must stop.
    AuthFailed(OracleError),
    /// Cancelled between retries; the record goes back to pending.
    Interrupted,
}

struct WorkerOutput {
    id: RecordId,
    result: WorkerResult,
    attempts: u32,
    oracle_time: Duration,
    usage: Option<TokenUsage>,
}

/// Label one record. Never fails: every error becomes part of the result.
async fn label_record(ctx: Arc<WorkerContext>, record: InputRecord) -> WorkerOutput {
    let attempted = ctx
        .retry
        .classify(ctx.client.as_ref(), &ctx.gate, &record, &ctx.cancel)
        .await;

    let mut usage = None;
    let result = match attempted.result {
        Ok(raw) => {
            usage = raw.usage;
            match ctx.validator.validate(&raw.content) {
                Ok(label) => WorkerResult::Finished(Outcome::Succeeded { label }),
                Err(e) => WorkerResult::Finished(Outcome::failed(FailureKind::InvalidSchema, e.to_string())),
            }
        }
        Err(e) if e.is_auth() => WorkerResult::AuthFailed(e),
        Err(_) if attempted.interrupted => WorkerResult::Interrupted,
        Err(e) if e.is_transient() => WorkerResult::Finished(Outcome::failed(
            FailureKind::TransientExhausted,
            format!("{} (after {} attempts)", e, attempted.attempts),
        )),
        Err(e @ OracleError::Malformed(_)) => {
            WorkerResult::Finished(Outcome::failed(FailureKind::InvalidSchema, e.to_string()))
        }
        Err(e) => WorkerResult::Finished(Outcome::failed(FailureKind::OracleRejected, e.to_string())),
    };

    WorkerOutput {
        id: record.id,
        result,
        attempts: attempted.attempts,
        oracle_time: attempted.oracle_time,
        usage,
    }
}

/// Single writer for checkpoint, sink and summary.
struct Collector<'a> {
    records: HashMap<RecordId, &'a InputRecord>,
    checkpoint: &'a dyn ProgressStore,
    sink: &'a mut dyn RecordSink,
    summary: RunSummary,
    pricing: Option<Pricing>,
    auth_failure: Option<String>,
}

impl Collector<'_> {
    /// Checkpoint first, then output: a crash in between leaves the outcome
    /// recoverable from the checkpoint.
    fn commit(&mut self, record: &InputRecord, outcome: Outcome, attempts: u32) -> Result<(), PipelineError> {
        let labeled = LabeledRecord {
            record: record.clone(),
            outcome,
            attempts,
        };
        self.checkpoint.record_progress(&labeled)?;
        self.sink.append(std::slice::from_ref(&labeled))?;
        self.summary.count_outcome(&labeled.outcome);

        match &labeled.outcome {
            Outcome::Failed { reason } => {
                warn!(id = %record.id, row = record.row, attempts, reason = %reason, "record failed")
            }
            other => debug!(id = %record.id, row = record.row, attempts, status = %other.status(), "record finished"),
        }
        Ok(())
    }

    fn finalize(&mut self, output: WorkerOutput) -> Result<(), PipelineError> {
        self.summary.attempts += u64::from(output.attempts);
        self.summary.retries += u64::from(output.attempts.saturating_sub(1));
        self.summary.oracle_time_ms += output.oracle_time.as_millis() as u64;
        self.summary.add_usage(output.usage, self.pricing);

        let record = self
            .records
            .get(&output.id)
            .copied()
            .ok_or_else(|| PipelineError::Worker(format!("worker returned unknown id {}", output.id)))?;

        match output.result {
            WorkerResult::Finished(outcome) => self.commit(record, outcome, output.attempts),
            WorkerResult::AuthFailed(e) => {
                self.checkpoint.revert_to_pending(&output.id)?;
                self.summary.interrupted += 1;
                if self.auth_failure.is_none() {
                    error!(id = %output.id, error = %e, "oracle rejected credentials, stopping run");
                    self.auth_failure = Some(e.to_string());
                }
                Ok(())
            }
            WorkerResult::Interrupted => {
                self.checkpoint.revert_to_pending(&output.id)?;
                self.summary.interrupted += 1;
                Ok(())
            }
        }
    }
}

/// Drives a batch of records through the oracle.
pub struct BatchOrchestrator {
    client: Arc<dyn OracleClient>,
    validator: SchemaValidator,
    retry: RetryPolicy,
    gate: Arc<RateGate>,
    cancel: CancellationToken,
    concurrency_limit: usize,
    limit: Option<usize>,
    pricing: Option<Pricing>,
}

impl BatchOrchestrator {
    /// An orchestrator with default retry policy, no rate pacing and a
    /// concurrency limit of 5.
    pub fn new(client: Arc<dyn OracleClient>) -> Self {
        Self {
            client,
            validator: SchemaValidator::new(),
            retry: RetryPolicy::default(),
            gate: Arc::new(RateGate::unlimited()),
            cancel: CancellationToken::new(),
            concurrency_limit: 5,
            limit: None,
            pricing: None,
        }
    }

    /// Build from validated configuration.
    pub fn from_config(config: &PipelineConfig, client: Arc<dyn OracleClient>) -> Self {
        Self::new(client)
            .with_concurrency(config.concurrency_limit)
            .with_retry_policy(config.retry_policy())
            .with_rate_gate(Arc::new(
                RateGate::per_minute(config.requests_per_minute)
                    .with_default_pause(Duration::from_secs(config.rate_limit_pause_secs))
                    .with_max_pause(config.max_rate_pause()),
            ))
            .with_pricing(config.pricing())
    }

    /// Maximum oracle calls in flight at once.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_rate_gate(mut self, gate: Arc<RateGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Dispatch at most `limit` records in this run.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_pricing(mut self, pricing: Option<Pricing>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Label every record the checkpoint does not already mark finished.
    ///
    /// Safe to call repeatedly with the same records and checkpoint:
    /// succeeded and skipped ids are never dispatched again, failed ids are
    /// retried. Outcomes stored by earlier runs are appended to `sink`
    /// first, so the output always reflects the whole checkpoint.
    pub async fn run(
        &self,
        records: &[InputRecord],
        checkpoint: &dyn ProgressStore,
        sink: &mut dyn RecordSink,
    ) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let by_id: HashMap<RecordId, &InputRecord> = records.iter().map(|r| (r.id, r)).collect();

        let prior: Vec<LabeledRecord> = checkpoint
            .completed_records()?
            .into_iter()
            .filter_map(|stored| {
                by_id.get(&stored.id).map(|record| LabeledRecord {
                    record: (*record).clone(),
                    outcome: stored.outcome,
                    attempts: stored.attempts,
                })
            })
            .collect();
        if !prior.is_empty() {
            sink.append(&prior)?;
        }

        let ids: Vec<RecordId> = records.iter().map(|r| r.id).collect();
        let mut remaining = checkpoint.remaining_work(&ids)?;
        let already_complete = ids.len() - remaining.len();
        if let Some(limit) = self.limit {
            remaining.truncate(limit);
        }

        let run_id = checkpoint.begin_run(records.len())?;
        info!(
            run_id,
            total = records.len(),
            already_complete,
            to_process = remaining.len(),
            concurrency = self.concurrency_limit,
            oracle = self.client.name(),
            "starting run"
        );

        let mut collector = Collector {
            records: by_id,
            checkpoint,
            sink,
            summary: RunSummary {
                total: records.len(),
                already_complete,
                ..RunSummary::default()
            },
            pricing: self.pricing,
            auth_failure: None,
        };

        let dispatched = self.dispatch(remaining, &mut collector).await;
        let flushed = collector.sink.flush();
        dispatched?;
        flushed?;

        let mut summary = collector.summary;
        if self.cancel.is_cancelled() {
            summary.cancelled = true;
        }
        summary.wall_time_ms = started.elapsed().as_millis() as u64;
        checkpoint.finish_run(run_id, &summary)?;

        info!(
            run_id,
            succeeded = summary.succeeded,
            failed = summary.failed_total(),
            skipped = summary.skipped,
            retries = summary.retries,
            cancelled = summary.cancelled,
            "run finished"
        );

        match collector.auth_failure {
            Some(message) => Err(PipelineError::Auth(message)),
            None => Ok(summary),
        }
    }

    async fn dispatch(&self, remaining: Vec<RecordId>, collector: &mut Collector<'_>) -> Result<(), PipelineError> {
        let ctx = Arc::new(WorkerContext {
            client: self.client.clone(),
            validator: self.validator,
            retry: self.retry.clone(),
            gate: self.gate.clone(),
            cancel: self.cancel.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut tasks: JoinSet<WorkerOutput> = JoinSet::new();

        for id in remaining {
            if self.cancel.is_cancelled() {
                collector.summary.cancelled = true;
                break;
            }
            if collector.auth_failure.is_some() {
                break;
            }

            let record: &InputRecord = collector.records[&id];
            if record.is_blank() {
                let outcome = Outcome::Skipped {
                    reason: "title and abstract are blank".to_string(),
                };
                collector.commit(record, outcome, 0)?;
                continue;
            }

            // Wait for a free slot, collecting finished work meanwhile.
            let permit = loop {
                tokio::select! {
                    biased;
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        let output = joined.map_err(|e| PipelineError::Worker(e.to_string()))?;
                        collector.finalize(output)?;
                        if collector.auth_failure.is_some() {
                            break None;
                        }
                    }
                    _ = self.cancel.cancelled() => break None,
                    permit = semaphore.clone().acquire_owned() => {
                        break Some(permit.map_err(|e| PipelineError::Worker(e.to_string()))?);
                    }
                }
            };
            let Some(permit) = permit else {
                if self.cancel.is_cancelled() {
                    collector.summary.cancelled = true;
                    info!("cancellation requested, no new dispatches");
                }
                break;
            };

            collector.checkpoint.mark_in_flight(&id)?;
            collector.summary.dispatched += 1;

            let ctx = ctx.clone();
            let owned = record.clone();
            tasks.spawn(async move {
                let _permit = permit;
                label_record(ctx, owned).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let output = joined.map_err(|e| PipelineError::Worker(e.to_string()))?;
            collector.finalize(output)?;
        }
        Ok(())
    }
}
