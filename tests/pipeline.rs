//! End-to-end pipeline behavior with a scripted oracle
//!
//! Covers the labeling scenarios, failure isolation, retry under rate
//! limiting, the concurrency bound, idempotent re-runs and resumption.

mod common;

use common::{fast_retry, mumbai_record, records, titles, MUMBAI_TITLE};
use eventcoder::{
    label_json, BatchOrchestrator, CancellationToken, FailureKind, GeographicScope, MemorySink, MockOracle,
    OpenCheckpoint, OracleError, Outcome, ProgressStore, RateGate, RecordStatus, SocialProtest, SqliteCheckpoint,
};
use std::sync::Arc;
use std::time::Duration;

fn title_refs(owned: &[String]) -> Vec<&str> {
    owned.iter().map(String::as_str).collect()
}

#[tokio::test]
async fn mumbai_strike_is_coded_as_vertical_conflict_in_india() {
    let record = mumbai_record();
    let oracle = Arc::new(MockOracle::new().with_reply(MUMBAI_TITLE, label_json(2, 1, 2, Some("Mumbai"))));
    let checkpoint = SqliteCheckpoint::open_in_memory().unwrap();
    let mut sink = MemorySink::new();

    let summary = BatchOrchestrator::new(oracle)
        .run(std::slice::from_ref(&record), &checkpoint, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    let label = sink.get(&record.id).unwrap().outcome.label().unwrap().clone();
    assert_eq!(label.social_protest, SocialProtest::VerticalConflict);
    assert_eq!(label.scope, GeographicScope::InIndia);
    assert_eq!(label.city.as_deref(), Some("Mumbai"));
}

#[tokio::test]
async fn malformed_reply_fails_record_and_run_continues() {
    let recs = records(&["garbled", "next one", "last one"]);
    let oracle = Arc::new(
        MockOracle::new()
            .with_default_reply(label_json(1, 2, 2, None))
            .with_reply("garbled", "Sure! This article describes a strike."),
    );
    let checkpoint = SqliteCheckpoint::open_in_memory().unwrap();
    let mut sink = MemorySink::new();

    let summary = BatchOrchestrator::new(oracle.clone())
        .with_concurrency(1)
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.failed_of(FailureKind::InvalidSchema), 1);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(oracle.total_calls(), 3);
    let failed = sink.get(&recs[0].id).unwrap();
    assert_eq!(failed.outcome.failure().unwrap().kind, FailureKind::InvalidSchema);
    // Malformed replies are not transient: one call only.
    assert_eq!(failed.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_twice_then_succeeds() {
    let recs = records(&["busy"]);
    let oracle = Arc::new(MockOracle::new().with_sequence(
        "busy",
        vec![
            Err(OracleError::RateLimited { retry_after: Some(Duration::from_secs(2)) }),
            Err(OracleError::RateLimited { retry_after: None }),
            Ok(label_json(2, 2, 2, Some("Calcutta"))),
        ],
    ));
    let gate = Arc::new(RateGate::unlimited().with_default_pause(Duration::from_secs(5)));
    let checkpoint = SqliteCheckpoint::open_in_memory().unwrap();
    let mut sink = MemorySink::new();

    let summary = BatchOrchestrator::new(oracle)
        .with_retry_policy(fast_retry(4))
        .with_rate_gate(gate.clone())
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.retries, 2);
    let labeled = sink.get(&recs[0].id).unwrap();
    assert!(matches!(labeled.outcome, Outcome::Succeeded { .. }));
    assert_eq!(labeled.attempts, 3);
    assert!(labeled.attempts <= 4);
    assert_eq!(gate.backpressure_events().await, 2);
}

#[tokio::test(start_paused = true)]
async fn in_flight_calls_never_exceed_concurrency_limit() {
    let owned = titles(20);
    let recs = records(&title_refs(&owned));
    let oracle = Arc::new(
        MockOracle::new()
            .with_default_reply(label_json(1, 1, 1, None))
            .with_latency(Duration::from_millis(20)),
    );
    let checkpoint = SqliteCheckpoint::open_in_memory().unwrap();
    let mut sink = MemorySink::new();

    let summary = BatchOrchestrator::new(oracle.clone())
        .with_concurrency(3)
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 20);
    assert_eq!(oracle.total_calls(), 20);
    assert_eq!(oracle.max_in_flight(), 3);
}

#[tokio::test]
async fn outcomes_respect_label_invariants() {
    let recs = records(&["good", "bad code", "rejected", "missing key"]);
    let oracle = Arc::new(
        MockOracle::new()
            .with_reply("good", label_json(9, 2, 1, None))
            .with_reply("bad code", label_json(5, 2, 1, None))
            .with_error(
                "rejected",
                OracleError::Rejected { status: 400, message: "content policy".into() },
            )
            .with_reply("missing key", r#"{"SP": 2, "CU": 2}"#),
    );
    let checkpoint = SqliteCheckpoint::open_in_memory().unwrap();
    let mut sink = MemorySink::new();

    BatchOrchestrator::new(oracle)
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap();

    assert_eq!(sink.len(), recs.len());
    for labeled in sink.records() {
        match &labeled.outcome {
            Outcome::Succeeded { label } => {
                assert!(SocialProtest::from_code(label.social_protest.code()).is_some());
            }
            Outcome::Failed { reason } => {
                assert!(!reason.detail.trim().is_empty());
                assert!(labeled.outcome.label().is_none());
            }
            Outcome::Skipped { .. } => panic!("nothing here should be skipped"),
        }
    }
    let kinds: Vec<_> = recs[1..]
        .iter()
        .map(|r| sink.get(&r.id).unwrap().outcome.failure().unwrap().kind)
        .collect();
    assert_eq!(
        kinds,
        vec![FailureKind::InvalidSchema, FailureKind::OracleRejected, FailureKind::InvalidSchema]
    );
}

#[tokio::test]
async fn rerun_does_not_touch_succeeded_records() {
    let recs = records(&["a", "b", "flaky"]);
    let checkpoint = SqliteCheckpoint::open_in_memory().unwrap();

    let first = Arc::new(
        MockOracle::new()
            .with_default_reply(label_json(1, 1, 1, None))
            .with_error("flaky", OracleError::Server { status: 503, message: "down".into() }),
    );
    let mut sink = MemorySink::new();
    let summary = BatchOrchestrator::new(first)
        .with_retry_policy(fast_retry(2))
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed_of(FailureKind::TransientExhausted), 1);
    let first_label = sink.get(&recs[0].id).unwrap().outcome.clone();

    // Second run: a different reply for "a" must not leak in, "flaky" now works.
    let second = Arc::new(
        MockOracle::new()
            .with_reply("a", label_json(2, 2, 2, Some("Madras")))
            .with_reply("flaky", label_json(2, 2, 2, Some("Lahore"))),
    );
    let mut sink = MemorySink::new();
    let summary = BatchOrchestrator::new(second.clone())
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.already_complete, 2);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(second.calls_for(&recs[0].id), 0);
    assert_eq!(second.calls_for(&recs[2].id), 1);
    assert_eq!(sink.get(&recs[0].id).unwrap().outcome, first_label);
    assert_eq!(sink.len(), 3);

    // Third run: nothing left.
    let third = Arc::new(MockOracle::new());
    let mut sink = MemorySink::new();
    let summary = BatchOrchestrator::new(third.clone())
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap();
    assert_eq!(summary.dispatched, 0);
    assert_eq!(third.total_calls(), 0);
    assert_eq!(sink.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_resumes_without_duplicate_calls() {
    let owned = titles(6);
    let recs = records(&title_refs(&owned));
    let checkpoint = SqliteCheckpoint::open_in_memory().unwrap();

    let oracle = Arc::new(
        MockOracle::new()
            .with_default_reply(label_json(1, 1, 2, None))
            .with_latency(Duration::from_millis(50)),
    );
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(75)).await;
        trigger.cancel();
    });

    let mut sink = MemorySink::new();
    let summary = BatchOrchestrator::new(oracle.clone())
        .with_concurrency(2)
        .with_cancellation(token)
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.succeeded, 4);
    let progress = checkpoint.load_progress().unwrap();
    assert!(progress.values().all(|s| *s != RecordStatus::InFlight));

    let resumed = Arc::new(MockOracle::new().with_default_reply(label_json(1, 1, 2, None)));
    let mut sink = MemorySink::new();
    let summary = BatchOrchestrator::new(resumed.clone())
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap();

    assert!(!summary.cancelled);
    assert_eq!(resumed.total_calls(), 2);
    assert_eq!(oracle.total_calls() + resumed.total_calls(), recs.len());
    assert_eq!(sink.len(), recs.len());
    assert!(sink.records().iter().all(|r| r.outcome.status() == RecordStatus::Succeeded));
}

#[tokio::test]
async fn crash_mid_run_is_recovered_from_checkpoint_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("progress.db");
    let owned = titles(5);
    let recs = records(&title_refs(&owned));

    {
        let checkpoint = SqliteCheckpoint::open(&path).unwrap();
        let oracle = Arc::new(MockOracle::new().with_default_reply(label_json(1, 1, 1, None)));
        let mut sink = MemorySink::new();
        BatchOrchestrator::new(oracle)
            .with_limit(Some(2))
            .run(&recs, &checkpoint, &mut sink)
            .await
            .unwrap();
        // Simulate a process killed while record 2 was at the oracle.
        checkpoint.mark_in_flight(&recs[2].id).unwrap();
    }

    let checkpoint = SqliteCheckpoint::open(&path).unwrap();
    assert_eq!(checkpoint.load_progress().unwrap()[&recs[2].id], RecordStatus::Pending);

    let oracle = Arc::new(MockOracle::new().with_default_reply(label_json(1, 1, 1, None)));
    let mut sink = MemorySink::new();
    let summary = BatchOrchestrator::new(oracle.clone())
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.already_complete, 2);
    assert_eq!(oracle.total_calls(), 3);
    assert_eq!(oracle.calls_for(&recs[0].id), 0);
    assert_eq!(sink.len(), 5);
    assert_eq!(checkpoint.runs().unwrap().len(), 2);
}

#[tokio::test]
async fn auth_failure_stops_dispatching() {
    let owned = titles(10);
    let recs = records(&title_refs(&owned));
    let oracle = Arc::new(MockOracle::new().with_default_error(OracleError::Auth("401 invalid api key".into())));
    let checkpoint = SqliteCheckpoint::open_in_memory().unwrap();
    let mut sink = MemorySink::new();

    let err = BatchOrchestrator::new(oracle.clone())
        .with_concurrency(1)
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("invalid api key"));
    assert!(oracle.total_calls() < recs.len());
    let counts = checkpoint.status_counts().unwrap();
    assert_eq!(counts.get(&RecordStatus::Failed), None);
    assert_eq!(counts.get(&RecordStatus::InFlight), None);
}

#[tokio::test]
async fn reordered_same_title_rows_keep_their_labels_on_resume() {
    let date = chrono::NaiveDate::from_ymd_opt(1928, 4, 26).unwrap();
    let strike = ("News in Brief".to_string(), "Mill strike in Bombay".to_string());
    let flowers = ("News in Brief".to_string(), "Flower show opens".to_string());
    let checkpoint = SqliteCheckpoint::open_in_memory().unwrap();

    let forward = eventcoder::InputRecord::assign_ids(vec![
        (strike.0.clone(), strike.1.clone(), date, vec![]),
        (flowers.0.clone(), flowers.1.clone(), date, vec![]),
    ]);
    let first = Arc::new(MockOracle::new().with_default_reply(label_json(2, 2, 2, Some("Bombay"))));
    let mut sink = MemorySink::new();
    BatchOrchestrator::new(first)
        .with_limit(Some(1))
        .run(&forward, &checkpoint, &mut sink)
        .await
        .unwrap();

    let reversed = eventcoder::InputRecord::assign_ids(vec![
        (flowers.0.clone(), flowers.1.clone(), date, vec![]),
        (strike.0.clone(), strike.1.clone(), date, vec![]),
    ]);
    let ids: Vec<_> = reversed.iter().map(|r| r.id).collect();
    assert_eq!(checkpoint.remaining_work(&ids).unwrap(), vec![reversed[0].id]);

    let second = Arc::new(MockOracle::new().with_default_reply(label_json(1, 2, 2, None)));
    let mut sink = MemorySink::new();
    BatchOrchestrator::new(second.clone())
        .run(&reversed, &checkpoint, &mut sink)
        .await
        .unwrap();

    assert_eq!(second.total_calls(), 1);
    let flower_label = sink.get(&reversed[0].id).unwrap().outcome.label().unwrap().clone();
    assert_eq!(flower_label.social_protest, SocialProtest::NoProtest);
    assert_eq!(flower_label.city, None);
    let strike_label = sink.get(&reversed[1].id).unwrap().outcome.label().unwrap().clone();
    assert_eq!(strike_label.social_protest, SocialProtest::VerticalConflict);
    assert_eq!(strike_label.city.as_deref(), Some("Bombay"));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_long_rate_limit_pause_returns_promptly() {
    let recs = records(&["throttled"]);
    let checkpoint = SqliteCheckpoint::open_in_memory().unwrap();
    let oracle = Arc::new(MockOracle::new().with_error(
        "throttled",
        OracleError::RateLimited { retry_after: Some(Duration::from_secs(3600)) },
    ));
    let gate = Arc::new(RateGate::unlimited().with_max_pause(Duration::from_secs(3600)));

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let start = tokio::time::Instant::now();
    let mut sink = MemorySink::new();
    let summary = BatchOrchestrator::new(oracle.clone())
        .with_retry_policy(fast_retry(4))
        .with_rate_gate(gate)
        .with_cancellation(token)
        .run(&recs, &checkpoint, &mut sink)
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(summary.cancelled);
    assert_eq!(summary.interrupted, 1);
    assert_eq!(oracle.total_calls(), 1);
    assert_eq!(checkpoint.load_progress().unwrap()[&recs[0].id], RecordStatus::Pending);
    assert!(sink.is_empty());
}
