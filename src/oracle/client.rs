//! Oracle client trait and error taxonomy

use crate::record::InputRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token accounting reported by the oracle for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Unvalidated oracle reply for one record.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// The message text. Expected to be a single JSON object.
    pub content: String,
    pub latency: Duration,
    pub usage: Option<TokenUsage>,
}

impl RawResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            latency: Duration::ZERO,
            usage: None,
        }
    }
}

/// Errors from oracle calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OracleError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited by oracle")]
    RateLimited { retry_after: Option<Duration> },
    #[error("oracle server error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("malformed oracle reply: {0}")]
    Malformed(String),
    #[error("cancelled before the oracle replied")]
    Cancelled,
}

impl OracleError {
    /// Transient errors are retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// Auth errors abort the whole run.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

/// Client trait for calling the classification oracle.
///
/// Abstracts over transport (HTTP, mock) so the pipeline doesn't depend on
/// how the oracle is reached. Implementations hold the instruction template;
/// callers pass only the record.
#[async_trait]
pub trait OracleClient: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Ask the oracle to label one record. A single attempt, no retries.
    async fn classify(&self, record: &InputRecord) -> Result<RawResponse, OracleError>;
}
