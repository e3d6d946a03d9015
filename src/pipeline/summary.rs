//! Run summary: counts per outcome and aggregate oracle cost

use crate::oracle::TokenUsage;
use crate::record::{FailureKind, Outcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Prices used to estimate spend, in USD per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

/// What one `run` did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Records in the input.
    pub total: usize,
    /// Records already succeeded or skipped before this run started.
    pub already_complete: usize,
    /// Records handed to the oracle in this run.
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: BTreeMap<FailureKind, usize>,
    pub skipped: usize,
    /// Dispatched records returned to pending (cancellation or auth abort).
    pub interrupted: usize,
    pub attempts: u64,
    pub retries: u64,
    pub oracle_time_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost_usd: Option<f64>,
    pub wall_time_ms: u64,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn failed_total(&self) -> usize {
        self.failed.values().sum()
    }

    pub fn failed_of(&self, kind: FailureKind) -> usize {
        self.failed.get(&kind).copied().unwrap_or(0)
    }

    /// Mean oracle time per attempt.
    pub fn mean_latency(&self) -> Duration {
        if self.attempts == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.oracle_time_ms / self.attempts)
    }

    pub(crate) fn count_outcome(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Succeeded { .. } => self.succeeded += 1,
            Outcome::Failed { reason } => *self.failed.entry(reason.kind).or_insert(0) += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
        }
    }

    pub(crate) fn add_usage(&mut self, usage: Option<TokenUsage>, pricing: Option<Pricing>) {
        if let Some(usage) = usage {
            self.prompt_tokens += usage.prompt_tokens;
            self.completion_tokens += usage.completion_tokens;
        }
        if let Some(p) = pricing {
            self.estimated_cost_usd = Some(
                self.prompt_tokens as f64 / 1000.0 * p.prompt_per_1k
                    + self.completion_tokens as f64 / 1000.0 * p.completion_per_1k,
            );
        }
    }
}

/// True when the failed share of `total` exceeds `tolerance` (a fraction).
pub fn exceeds_tolerance(failed: usize, total: usize, tolerance: f64) -> bool {
    if failed == 0 {
        return false;
    }
    if total == 0 {
        return true;
    }
    failed as f64 / total as f64 > tolerance
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "records          {:>8}", self.total)?;
        writeln!(f, "already complete {:>8}", self.already_complete)?;
        writeln!(f, "dispatched       {:>8}", self.dispatched)?;
        writeln!(f, "succeeded        {:>8}", self.succeeded)?;
        writeln!(f, "failed           {:>8}", self.failed_total())?;
        for (kind, count) in &self.failed {
            writeln!(f, "  {:<15}{:>8}", kind.as_str(), count)?;
        }
        writeln!(f, "skipped          {:>8}", self.skipped)?;
        if self.interrupted > 0 {
            writeln!(f, "interrupted      {:>8}", self.interrupted)?;
        }
        writeln!(f, "attempts         {:>8}", self.attempts)?;
        writeln!(f, "retries          {:>8}", self.retries)?;
        writeln!(f, "mean latency     {:>6}ms", self.mean_latency().as_millis())?;
        writeln!(
            f,
            "tokens           {:>8} prompt / {} completion",
            self.prompt_tokens, self.completion_tokens
        )?;
        if let Some(cost) = self.estimated_cost_usd {
            writeln!(f, "estimated cost   ${:>7.4}", cost)?;
        }
        write!(f, "wall time        {:>6}ms", self.wall_time_ms)?;
        if self.cancelled {
            write!(f, "\n(run was cancelled; resume to finish)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CurrentEvent, GeographicScope, Label, SocialProtest};

    #[test]
    fn counts_outcomes_by_kind() {
        let mut s = RunSummary::default();
        s.count_outcome(&Outcome::Succeeded {
            label: Label::new(
                SocialProtest::NoProtest,
                CurrentEvent::PriorToYear,
                GeographicScope::OutsideIndia,
            ),
        });
        s.count_outcome(&Outcome::failed(FailureKind::InvalidSchema, "x"));
        s.count_outcome(&Outcome::failed(FailureKind::InvalidSchema, "y"));
        s.count_outcome(&Outcome::failed(FailureKind::TransientExhausted, "z"));
        s.count_outcome(&Outcome::Skipped { reason: "blank".into() });

        assert_eq!(s.succeeded, 1);
        assert_eq!(s.failed_total(), 3);
        assert_eq!(s.failed_of(FailureKind::InvalidSchema), 2);
        assert_eq!(s.failed_of(FailureKind::OracleRejected), 0);
        assert_eq!(s.skipped, 1);
    }

    #[test]
    fn estimates_cost_from_usage() {
        let mut s = RunSummary::default();
        let pricing = Some(Pricing {
            prompt_per_1k: 0.5,
            completion_per_1k: 1.5,
        });
        s.add_usage(Some(TokenUsage { prompt_tokens: 1000, completion_tokens: 0 }), pricing);
        s.add_usage(Some(TokenUsage { prompt_tokens: 1000, completion_tokens: 2000 }), pricing);
        assert_eq!(s.prompt_tokens, 2000);
        let cost = s.estimated_cost_usd.unwrap();
        assert!((cost - 4.0).abs() < 1e-9, "{cost}");
    }

    #[test]
    fn tolerance_check() {
        assert!(!exceeds_tolerance(0, 10, 0.0));
        assert!(exceeds_tolerance(1, 10, 0.0));
        assert!(!exceeds_tolerance(1, 10, 0.1));
        assert!(exceeds_tolerance(2, 10, 0.1));
    }

    #[test]
    fn serializes_failure_kinds_as_keys() {
        let mut s = RunSummary::default();
        s.count_outcome(&Outcome::failed(FailureKind::OracleRejected, "400"));
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["failed"]["oracleRejected"], 1);
    }
}
