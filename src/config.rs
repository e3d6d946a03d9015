//! Pipeline configuration
//!
//! Layered: defaults, then an optional YAML file, then environment
//! variables. CLI flags are applied last by the binary.

use crate::oracle::{OpenAiSettings, RetryPolicy};
use crate::pipeline::Pricing;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("environment variable {name}: cannot parse '{value}'")]
    Env { name: &'static str, value: String },

    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("no oracle API key: set EVENTCODER_API_KEY or OPENAI_API_KEY")]
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Usually supplied through the environment rather than the file.
    pub oracle_api_key: Option<String>,
    pub oracle_base_url: String,
    pub model: String,
    pub concurrency_limit: usize,
    /// Attempts per record, including the first.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub requests_per_minute: u32,
    pub rate_limit_pause_secs: u64,
    pub checkpoint_path: Option<PathBuf>,
    pub template_path: Option<PathBuf>,
    pub seed: i64,
    /// Fraction of records allowed to fail before the run exits non-zero.
    pub failure_tolerance: f64,
    pub flush_every: usize,
    pub prompt_price_per_1k: Option<f64>,
    pub completion_price_per_1k: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            oracle_api_key: None,
            oracle_base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            concurrency_limit: 5,
            max_retries: 4,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            request_timeout_secs: 60,
            requests_per_minute: 60,
            rate_limit_pause_secs: 20,
            checkpoint_path: None,
            template_path: None,
            seed: 42,
            failure_tolerance: 0.0,
            flush_every: 25,
            prompt_price_per_1k: None,
            completion_price_per_1k: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Overlay values from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Overlay values from `lookup`; unset or empty variables are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("EVENTCODER_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.oracle_api_key = Some(key);
        }
        if let Some(url) = get("EVENTCODER_BASE_URL") {
            self.oracle_base_url = url;
        }
        if let Some(model) = get("EVENTCODER_MODEL") {
            self.model = model;
        }
        if let Some(path) = get("EVENTCODER_CHECKPOINT") {
            self.checkpoint_path = Some(PathBuf::from(path));
        }
        if let Some(path) = get("EVENTCODER_TEMPLATE") {
            self.template_path = Some(PathBuf::from(path));
        }
        if let Some(v) = get("EVENTCODER_CONCURRENCY") {
            self.concurrency_limit = parse_env("EVENTCODER_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("EVENTCODER_MAX_RETRIES") {
            self.max_retries = parse_env("EVENTCODER_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("EVENTCODER_RPM") {
            self.requests_per_minute = parse_env("EVENTCODER_RPM", &v)?;
        }
        if let Some(v) = get("EVENTCODER_FAILURE_TOLERANCE") {
            self.failure_tolerance = parse_env("EVENTCODER_FAILURE_TOLERANCE", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(invalid("concurrency_limit", "must be at least 1"));
        }
        if !(1..=10).contains(&self.max_retries) {
            return Err(invalid("max_retries", format!("{} is outside 1..=10", self.max_retries)));
        }
        if self.requests_per_minute == 0 {
            return Err(invalid("requests_per_minute", "must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be at least 1"));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(invalid("retry_max_delay_ms", "must not be below retry_base_delay_ms"));
        }
        if !(0.0..=1.0).contains(&self.failure_tolerance) {
            return Err(invalid(
                "failure_tolerance",
                format!("{} is not a fraction between 0 and 1", self.failure_tolerance),
            ));
        }
        if self.flush_every == 0 {
            return Err(invalid("flush_every", "must be at least 1"));
        }
        if !self.oracle_base_url.starts_with("http://") && !self.oracle_base_url.starts_with("https://") {
            return Err(invalid("oracle_base_url", format!("'{}' is not an http(s) URL", self.oracle_base_url)));
        }
        Ok(())
    }

    /// Configured checkpoint path, else `<data_dir>/eventcoder/checkpoint.db`.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("eventcoder")
                .join("checkpoint.db")
        })
    }

    /// Longest backpressure pause a `Retry-After` header may impose.
    pub fn max_rate_pause(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms).max(Duration::from_secs(self.rate_limit_pause_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            call_timeout: Duration::from_secs(self.request_timeout_secs),
            ..RetryPolicy::default()
        }
    }

    /// Both prices must be set for cost estimation.
    pub fn pricing(&self) -> Option<Pricing> {
        Some(Pricing {
            prompt_per_1k: self.prompt_price_per_1k?,
            completion_per_1k: self.completion_price_per_1k?,
        })
    }

    pub fn openai_settings(&self) -> Result<OpenAiSettings, ConfigError> {
        let key = self.oracle_api_key.as_deref().ok_or(ConfigError::MissingApiKey)?;
        Ok(OpenAiSettings {
            base_url: self.oracle_base_url.trim_end_matches('/').to_string(),
            model: self.model.clone(),
            seed: self.seed,
            timeout: Duration::from_secs(self.request_timeout_secs),
            ..OpenAiSettings::new(key)
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        name,
        value: value.to_string(),
    })
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}
