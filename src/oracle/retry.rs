//! Retry with exponential backoff for oracle calls

use super::client::{OracleClient, OracleError, RawResponse};
use super::rate::RateGate;
use crate::pipeline::CancellationToken;
use crate::record::InputRecord;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of classifying one record, including every attempt it took.
#[derive(Debug)]
pub struct Attempted {
    pub result: Result<RawResponse, OracleError>,
    pub attempts: u32,
    /// Time spent waiting on the oracle, summed over attempts.
    pub oracle_time: Duration,
    /// True when cancellation stopped further retries.
    pub interrupted: bool,
}

/// Bounded retry policy for transient oracle failures.
///
/// Non-transient failures are returned after the first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per record, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Randomize delays by ±10%.
    pub jitter: bool,
    /// Upper bound on one oracle call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let jitter = delay.as_millis() as f64 * 0.1 * (rand::random::<f64>() * 2.0 - 1.0);
        Duration::from_millis((delay.as_millis() as f64 + jitter).max(0.0) as u64)
    }

    /// Classify `record`, passing the rate gate before every attempt.
    ///
    /// Rate-limit replies put the whole gate into backpressure before this
    /// call backs off, so other workers slow down too. Cancellation ends the
    /// wait for the gate or a backoff at once; a call already sent to the
    /// oracle runs to completion.
    pub async fn classify(
        &self,
        client: &dyn OracleClient,
        gate: &RateGate,
        record: &InputRecord,
        cancel: &CancellationToken,
    ) -> Attempted {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;
        let mut oracle_time = Duration::ZERO;
        let mut last_error = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Attempted {
                        result: Err(last_error.unwrap_or(OracleError::Cancelled)),
                        attempts,
                        oracle_time,
                        interrupted: true,
                    };
                }
                _ = gate.acquire() => {}
            }
            attempts += 1;

            let started = tokio::time::Instant::now();
            let result = match tokio::time::timeout(self.call_timeout, client.classify(record)).await {
                Ok(result) => result,
                Err(_) => Err(OracleError::Timeout(self.call_timeout)),
            };
            oracle_time += started.elapsed();

            let error = match result {
                Ok(response) => {
                    if attempts > 1 {
                        debug!(id = %record.id, attempts, "retry succeeded");
                    }
                    return Attempted {
                        result: Ok(response),
                        attempts,
                        oracle_time,
                        interrupted: false,
                    };
                }
                Err(e) => e,
            };

            if let OracleError::RateLimited { retry_after } = &error {
                gate.backpressure(*retry_after).await;
            }

            if !error.is_transient() || attempts >= max_attempts {
                if error.is_transient() {
                    warn!(id = %record.id, attempts, error = %error, "retries exhausted");
                }
                return Attempted {
                    result: Err(error),
                    attempts,
                    oracle_time,
                    interrupted: false,
                };
            }

            let delay = self.jittered(self.backoff(attempts));
            debug!(
                id = %record.id,
                attempt = attempts,
                error = %error,
                delay_ms = delay.as_millis() as u64,
                "transient oracle error, retrying"
            );
            last_error = Some(error);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{label_json, MockOracle};
    use chrono::NaiveDate;

    fn record(title: &str) -> InputRecord {
        InputRecord::assign_ids(vec![(
            title.into(),
            "abstract".into(),
            NaiveDate::from_ymd_opt(1923, 5, 1).unwrap(),
            vec![],
        )])
        .remove(0)
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            ..policy(5)
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
        assert_eq!(p.backoff(10), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_twice_then_success() {
        let oracle = MockOracle::new().with_sequence(
            "strike",
            vec![
                Err(OracleError::RateLimited { retry_after: Some(Duration::from_secs(1)) }),
                Err(OracleError::RateLimited { retry_after: None }),
                Ok(label_json(2, 2, 2, Some("Mumbai"))),
            ],
        );
        let gate = RateGate::unlimited().with_default_pause(Duration::from_secs(2));
        let r = record("strike");

        let attempted = policy(4)
            .classify(&oracle, &gate, &r, &CancellationToken::new())
            .await;

        assert!(attempted.result.is_ok());
        assert_eq!(attempted.attempts, 3);
        assert!(attempted.attempts <= 4);
        assert_eq!(gate.backpressure_events().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_budget() {
        let oracle = MockOracle::new().with_error(
            "flaky",
            OracleError::Server { status: 502, message: "bad gateway".into() },
        );
        let r = record("flaky");

        let attempted = policy(3)
            .classify(&oracle, &RateGate::unlimited(), &r, &CancellationToken::new())
            .await;

        assert!(matches!(attempted.result, Err(OracleError::Server { status: 502, .. })));
        assert_eq!(attempted.attempts, 3);
        assert_eq!(oracle.calls_for(&r.id), 3);
        assert!(!attempted.interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let oracle = MockOracle::new().with_error("bad", OracleError::Auth("revoked".into()));
        let r = record("bad");

        let attempted = policy(5)
            .classify(&oracle, &RateGate::unlimited(), &r, &CancellationToken::new())
            .await;

        assert!(matches!(attempted.result, Err(OracleError::Auth(_))));
        assert_eq!(attempted.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_as_transient() {
        let oracle = MockOracle::new()
            .with_default_reply(label_json(1, 1, 1, None))
            .with_latency(Duration::from_secs(120));
        let p = RetryPolicy {
            call_timeout: Duration::from_secs(10),
            ..policy(2)
        };

        let attempted = p
            .classify(&oracle, &RateGate::unlimited(), &record("slow"), &CancellationToken::new())
            .await;

        assert!(matches!(attempted.result, Err(OracleError::Timeout(_))));
        assert_eq!(attempted.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_attempt_sends_nothing() {
        let oracle = MockOracle::new().with_error("x", OracleError::Network("reset".into()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let attempted = policy(5)
            .classify(&oracle, &RateGate::unlimited(), &record("x"), &cancel)
            .await;

        assert!(attempted.interrupted);
        assert_eq!(attempted.attempts, 0);
        assert!(matches!(attempted.result, Err(OracleError::Cancelled)));
        assert_eq!(oracle.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_cuts_long_backoff_short() {
        let oracle = MockOracle::new().with_error("x", OracleError::Network("reset".into()));
        let p = RetryPolicy {
            base_delay: Duration::from_secs(600),
            max_delay: Duration::from_secs(600),
            ..policy(5)
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let attempted = p
            .classify(&oracle, &RateGate::unlimited(), &record("x"), &cancel)
            .await;

        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(attempted.interrupted);
        assert_eq!(attempted.attempts, 1);
        assert!(matches!(attempted.result, Err(OracleError::Network(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_ends_backpressure_wait() {
        let oracle = MockOracle::new().with_error(
            "busy",
            OracleError::RateLimited { retry_after: Some(Duration::from_secs(3600)) },
        );
        let gate = RateGate::unlimited().with_max_pause(Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let attempted = RetryPolicy {
            base_delay: Duration::from_millis(10),
            ..policy(5)
        }
        .classify(&oracle, &gate, &record("busy"), &cancel)
        .await;

        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(attempted.interrupted);
        assert_eq!(oracle.total_calls(), 1);
    }
}
