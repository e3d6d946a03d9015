//! Instruction template sent with every classification request
//!
//! The template is loaded once at startup and shared read-only by all
//! workers. Per-record context is rendered separately from it.

use crate::record::InputRecord;
use std::path::Path;
use std::sync::Arc;

const BUILTIN_TEMPLATE: &str = include_str!("../../prompts/protest_coding.md");

/// Fixed instruction text plus the per-record context format.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    instructions: Arc<str>,
}

impl PromptTemplate {
    /// The protest-coding template shipped with the crate.
    pub fn builtin() -> Self {
        Self {
            instructions: Arc::from(BUILTIN_TEMPLATE),
        }
    }

    pub fn from_text(text: impl AsRef<str>) -> Option<Self> {
        let text = text.as_ref().trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            instructions: Arc::from(text),
        })
    }

    /// Read a template file. Empty files are rejected.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_text(&text).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("template file '{}' is empty", path.display()),
            )
        })
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// The per-record message: title, abstract and ISO publication date.
    pub fn render_context(&self, record: &InputRecord) -> String {
        format!(
            "Title: {}\nAbstract: {}\nPublication date: {}",
            record.title.trim(),
            record.abstract_text.trim(),
            record.pub_date_iso()
        )
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::builtin()
    }
}
