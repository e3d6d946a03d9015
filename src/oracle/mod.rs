//! Classification oracle: the external LLM that labels records
//!
//! Defines the client trait and response types for calling the oracle.
//! Two implementations:
//! - `OpenAiOracle`: OpenAI-compatible chat completions over HTTP (production)
//! - `MockOracle`: returns scripted replies per record title (testing)
//!
//! Every call goes through `RetryPolicy`, which applies the shared
//! `RateGate` before each attempt and retries transient failures.

mod client;
mod mock;
mod openai;
mod prompt;
mod rate;
mod retry;

pub use client::{OracleClient, OracleError, RawResponse, TokenUsage};
pub use mock::{label_json, MockOracle};
pub use openai::{OpenAiOracle, OpenAiSettings};
pub use prompt::PromptTemplate;
pub use rate::RateGate;
pub use retry::{Attempted, RetryPolicy};
