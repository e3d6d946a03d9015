//! OpenAI-compatible chat-completions oracle
//!
//! Requests the lowest-variance decoding the API offers: temperature 0,
//! a fixed seed, and JSON-object response format. Replies are still only
//! best-effort repeatable.

use super::client::{OracleClient, OracleError, RawResponse, TokenUsage};
use super::prompt::PromptTemplate;
use crate::record::InputRecord;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Connection settings for `OpenAiOracle`.
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    /// Base URL without trailing slash, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    pub seed: i64,
    pub timeout: Duration,
}

impl OpenAiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            seed: 42,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// HTTP oracle speaking the OpenAI chat-completions protocol.
pub struct OpenAiOracle {
    http: reqwest::Client,
    settings: OpenAiSettings,
    template: PromptTemplate,
}

impl OpenAiOracle {
    pub fn new(settings: OpenAiSettings, template: PromptTemplate) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| OracleError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            settings,
            template,
        })
    }

    fn request_body(&self, record: &InputRecord) -> serde_json::Value {
        serde_json::json!({
            "model": self.settings.model,
            "temperature": 0,
            "seed": self.settings.seed,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": self.template.instructions() },
                { "role": "user", "content": self.template.render_context(record) },
            ],
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> OracleError {
        if e.is_timeout() {
            OracleError::Timeout(self.settings.timeout)
        } else {
            OracleError::Network(e.to_string())
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn status_error(status: StatusCode, headers: &reqwest::header::HeaderMap, body: String) -> OracleError {
    let message: String = body.chars().take(300).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => OracleError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => OracleError::RateLimited {
            retry_after: retry_after(headers),
        },
        StatusCode::REQUEST_TIMEOUT => OracleError::Server {
            status: status.as_u16(),
            message,
        },
        s if s.is_server_error() => OracleError::Server {
            status: s.as_u16(),
            message,
        },
        s => OracleError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl OracleClient for OpenAiOracle {
    fn name(&self) -> &str {
        &self.settings.model
    }

    async fn classify(&self, record: &InputRecord) -> Result<RawResponse, OracleError> {
        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        let started = Instant::now();

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&self.request_body(record))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        let latency = started.elapsed();

        if !status.is_success() {
            return Err(status_error(status, &headers, body));
        }

        let completion: ChatCompletion = serde_json::from_str(&body)
            .map_err(|e| OracleError::Malformed(format!("invalid completion envelope: {}", e)))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Malformed("completion has no message content".to_string()))?;

        debug!(id = %record.id, latency_ms = latency.as_millis() as u64, "oracle replied");

        Ok(RawResponse {
            content,
            latency,
            usage: completion.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}
