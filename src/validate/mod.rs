//! Schema validation of oracle replies
//!
//! A reply becomes a `Label` only if it is a single JSON object with exactly
//! the expected keys, every code maps to an allowed value, and every
//! extraction field is a string or null. Anything else is rejected with a
//! reason; nothing is defaulted.

use crate::record::{CurrentEvent, GeographicScope, Label, SocialProtest};
use serde_json::{Map, Value};
use thiserror::Error;

/// Keys the oracle must return, in output-table order.
pub const LABEL_KEYS: [&str; 8] = [
    "SP",
    "CU",
    "INT",
    "City",
    "Other_Location",
    "Actors",
    "Demands",
    "Action_Type",
];

/// Why a reply failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("reply is not JSON: {0}")]
    NotJson(String),
    #[error("reply is not a JSON object")]
    NotObject,
    #[error("missing key '{0}'")]
    MissingKey(&'static str),
    #[error("unexpected key '{0}'")]
    UnexpectedKey(String),
    #[error("'{key}' has unknown code {value}")]
    InvalidCode { key: &'static str, value: String },
    #[error("'{key}' must be a string or null, got {value}")]
    InvalidField { key: &'static str, value: String },
}

/// Extract a JSON value from reply text.
///
/// Accepts the text as-is, or the body of a single fenced code block
/// (```json ... ``` or ``` ... ```). Prose around a bare object is not
/// accepted.
fn extract_json(text: &str) -> Result<Value, ValidationError> {
    let trimmed = text.trim();

    let direct = serde_json::from_str::<Value>(trimmed);
    if let Ok(v) = direct {
        return Ok(v);
    }

    let fenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"));

    if let Some(block) = fenced {
        if let Ok(v) = serde_json::from_str::<Value>(block.trim()) {
            return Ok(v);
        }
    }

    let snippet: String = trimmed.chars().take(80).collect();
    Err(ValidationError::NotJson(snippet))
}

/// Read an integer code given as a JSON integer or a string holding one.
fn code(obj: &Map<String, Value>, key: &'static str) -> Result<Option<i64>, ValidationError> {
    let value = obj.get(key).ok_or(ValidationError::MissingKey(key))?;
    Ok(match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    })
}

fn enumerated<T>(
    obj: &Map<String, Value>,
    key: &'static str,
    from_code: fn(i64) -> Option<T>,
) -> Result<T, ValidationError> {
    code(obj, key)?
        .and_then(from_code)
        .ok_or_else(|| ValidationError::InvalidCode {
            key,
            value: obj[key].to_string(),
        })
}

fn extraction(obj: &Map<String, Value>, key: &'static str) -> Result<Option<String>, ValidationError> {
    match obj.get(key) {
        None => Err(ValidationError::MissingKey(key)),
        Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok(if s.is_empty() { None } else { Some(s.to_string()) })
        }
        Some(other) => Err(ValidationError::InvalidField {
            key,
            value: other.to_string(),
        }),
    }
}

/// Validates raw oracle replies against the label schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, raw: &str) -> Result<Label, ValidationError> {
        let value = extract_json(raw)?;
        let obj = value.as_object().ok_or(ValidationError::NotObject)?;

        if let Some(extra) = obj.keys().find(|k| !LABEL_KEYS.contains(&k.as_str())) {
            return Err(ValidationError::UnexpectedKey(extra.clone()));
        }

        Ok(Label {
            social_protest: enumerated(obj, "SP", SocialProtest::from_code)?,
            current_event: enumerated(obj, "CU", CurrentEvent::from_code)?,
            scope: enumerated(obj, "INT", GeographicScope::from_code)?,
            city: extraction(obj, "City")?,
            other_location: extraction(obj, "Other_Location")?,
            actors: extraction(obj, "Actors")?,
            demands: extraction(obj, "Demands")?,
            action_type: extraction(obj, "Action_Type")?,
        })
    }
}
