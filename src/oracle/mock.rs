//! Scripted oracle for tests and offline runs

use super::client::{OracleClient, OracleError, RawResponse, TokenUsage};
use crate::record::{InputRecord, RecordId};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Reply = Result<String, OracleError>;

/// Mock oracle that returns preconfigured replies keyed by record title.
///
/// A title can have a fixed reply, a sequence of replies consumed one per
/// call, or both (the fixed reply applies once the sequence is used up).
/// Titles with nothing scripted get the default reply, if any, else a
/// permanent rejection.
pub struct MockOracle {
    fixed: HashMap<String, Reply>,
    sequences: Mutex<HashMap<String, VecDeque<Reply>>>,
    default_reply: Option<Reply>,
    latency: Duration,
    usage: Option<TokenUsage>,
    calls: Mutex<HashMap<RecordId, usize>>,
    total_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockOracle {
    pub fn new() -> Self {
        Self {
            fixed: HashMap::new(),
            sequences: Mutex::new(HashMap::new()),
            default_reply: None,
            latency: Duration::ZERO,
            usage: None,
            calls: Mutex::new(HashMap::new()),
            total_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Reply for every title without a script.
    pub fn with_default_reply(mut self, content: impl Into<String>) -> Self {
        self.default_reply = Some(Ok(content.into()));
        self
    }

    /// Fail every title without a script.
    pub fn with_default_error(mut self, error: OracleError) -> Self {
        self.default_reply = Some(Err(error));
        self
    }

    /// Always reply with `content` for this title.
    pub fn with_reply(mut self, title: impl Into<String>, content: impl Into<String>) -> Self {
        self.fixed.insert(title.into(), Ok(content.into()));
        self
    }

    /// Always fail with `error` for this title.
    pub fn with_error(mut self, title: impl Into<String>, error: OracleError) -> Self {
        self.fixed.insert(title.into(), Err(error));
        self
    }

    /// Reply with each entry in turn for this title.
    pub fn with_sequence(self, title: impl Into<String>, replies: Vec<Reply>) -> Self {
        self.sequences
            .lock()
            .unwrap()
            .insert(title.into(), replies.into_iter().collect());
        self
    }

    /// Simulated round-trip time for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Calls made for one record id.
    pub fn calls_for(&self, id: &RecordId) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, title: &str) -> Reply {
        if let Some(reply) = self
            .sequences
            .lock()
            .unwrap()
            .get_mut(title)
            .and_then(|queue| queue.pop_front())
        {
            return reply;
        }
        if let Some(reply) = self.fixed.get(title) {
            return reply.clone();
        }
        self.default_reply.clone().unwrap_or_else(|| {
            Err(OracleError::Rejected {
                status: 404,
                message: format!("no mock reply for title '{}'", title),
            })
        })
    }
}

/// Decrements the in-flight count even if the call is dropped mid-sleep.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OracleClient for MockOracle {
    fn name(&self) -> &str {
        "mock"
    }

    async fn classify(&self, record: &InputRecord) -> Result<RawResponse, OracleError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().unwrap().entry(record.id).or_insert(0) += 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.next_reply(record.title.trim()).map(|content| RawResponse {
            content,
            latency: self.latency,
            usage: self.usage,
        })
    }
}

/// Helper to build a conforming oracle reply.
pub fn label_json(sp: i64, cu: i64, int: i64, city: Option<&str>) -> String {
    serde_json::json!({
        "SP": sp,
        "CU": cu,
        "INT": int,
        "City": city,
        "Other_Location": null,
        "Actors": null,
        "Demands": null,
        "Action_Type": null,
    })
    .to_string()
}
