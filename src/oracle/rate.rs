//! Global request pacing shared by all workers
//!
//! Spaces oracle requests evenly to stay under a requests-per-minute quota.
//! When the oracle signals backpressure, every caller waits out the pause
//! before its next request, so new dispatches slow down, not just retries.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug)]
struct GateState {
    next_slot: Instant,
    paused_until: Option<Instant>,
    backpressure_events: u64,
}

/// Shared rate limiter. All state is behind one async mutex.
#[derive(Debug)]
pub struct RateGate {
    interval: Duration,
    default_pause: Duration,
    max_pause: Duration,
    state: Mutex<GateState>,
}

impl RateGate {
    /// Allow at most `requests_per_minute` request starts per minute.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self::with_interval(Duration::from_secs(60) / rpm)
    }

    /// Space request starts at least `interval` apart.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            default_pause: Duration::from_secs(20),
            max_pause: Duration::from_secs(60),
            state: Mutex::new(GateState {
                next_slot: Instant::now(),
                paused_until: None,
                backpressure_events: 0,
            }),
        }
    }

    /// No pacing. Backpressure pauses still apply.
    pub fn unlimited() -> Self {
        Self::with_interval(Duration::ZERO)
    }

    /// Pause used when the oracle rate-limits without a retry hint.
    pub fn with_default_pause(mut self, pause: Duration) -> Self {
        self.default_pause = pause;
        self
    }

    /// Upper bound on any single pause, whatever the oracle asks for.
    pub fn with_max_pause(mut self, max_pause: Duration) -> Self {
        self.max_pause = max_pause;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next request slot.
    pub async fn acquire(&self) {
        loop {
            let slot = {
                let mut state = self.state.lock().await;
                let mut slot = state.next_slot.max(Instant::now());
                if let Some(until) = state.paused_until {
                    slot = slot.max(until);
                }
                state.next_slot = slot + self.interval;
                slot
            };
            tokio::time::sleep_until(slot).await;

            // A pause may have been signalled while we slept.
            let paused_until = self.state.lock().await.paused_until;
            match paused_until {
                Some(until) if until > Instant::now() => continue,
                _ => return,
            }
        }
    }

    /// Record a backpressure signal and hold all new requests for
    /// `retry_after`, or the default pause when the oracle gave no hint.
    /// Either is capped at the maximum pause.
    pub async fn backpressure(&self, retry_after: Option<Duration>) {
        let pause = retry_after.unwrap_or(self.default_pause).min(self.max_pause);
        let until = Instant::now() + pause;
        let mut state = self.state.lock().await;
        state.backpressure_events += 1;
        if state.paused_until.map_or(true, |current| current < until) {
            state.paused_until = Some(until);
            warn!(pause_ms = pause.as_millis() as u64, "oracle backpressure, pausing dispatch");
        }
    }

    /// Number of backpressure signals seen so far.
    pub async fn backpressure_events(&self) -> u64 {
        self.state.lock().await.backpressure_events
    }
}
