//! Input records and their stable identity

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Namespace for record ids. Changing it invalidates every checkpoint.
const RECORD_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_3c2e_9b4d_4e7a_8c15_d02b_7f93_e461);

/// Unique, content-derived identifier for an input record.
///
/// Derived from title, abstract and publication date, so it survives row
/// reordering and partial rewrites of the source table. Only rows identical
/// in all three fields are told apart by their order of appearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Derive the id for the `occurrence`-th record (1-based) with this
    /// title, abstract and date.
    pub fn derive(title: &str, abstract_text: &str, pub_date: &NaiveDate, occurrence: usize) -> Self {
        let mut key = format!(
            "{}\u{1f}{}\u{1f}{}",
            title.trim(),
            pub_date.format("%Y-%m-%d"),
            abstract_text.trim()
        );
        if occurrence > 1 {
            key.push('\u{1f}');
            key.push_str(&occurrence.to_string());
        }
        Self(Uuid::new_v5(&RECORD_NAMESPACE, key.as_bytes()))
    }

    /// Parse an id previously produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One newspaper article as read from the source table.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    pub id: RecordId,
    /// 0-based data row in the source table. Informational only.
    pub row: usize,
    pub title: String,
    pub abstract_text: String,
    pub pub_date: NaiveDate,
    /// Source columns other than Title/Abstract/PubDate, carried through to the output.
    pub extra: Vec<(String, String)>,
}

impl InputRecord {
    /// Build records in source order, assigning ids and disambiguating repeats.
    pub fn assign_ids(rows: Vec<(String, String, NaiveDate, Vec<(String, String)>)>) -> Vec<Self> {
        let mut seen: HashMap<(String, String, NaiveDate), usize> = HashMap::new();
        rows.into_iter()
            .enumerate()
            .map(|(row, (title, abstract_text, pub_date, extra))| {
                let occurrence = seen
                    .entry((title.trim().to_string(), abstract_text.trim().to_string(), pub_date))
                    .and_modify(|n| *n += 1)
                    .or_insert(1);
                Self {
                    id: RecordId::derive(&title, &abstract_text, &pub_date, *occurrence),
                    row,
                    title,
                    abstract_text,
                    pub_date,
                    extra,
                }
            })
            .collect()
    }

    /// ISO `YYYY-MM-DD` rendering of the publication date.
    pub fn pub_date_iso(&self) -> String {
        self.pub_date.format("%Y-%m-%d").to_string()
    }

    /// True when there is no text for the oracle to judge.
    pub fn is_blank(&self) -> bool {
        self.title.trim().is_empty() && self.abstract_text.trim().is_empty()
    }
}

/// Parse the date formats seen in newspaper archive exports.
pub fn normalize_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(d);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.date());
        }
    }
    None
}
