//! Common test utilities for pipeline integration tests
//!
//! Builders for record tables, CSV fixtures on disk, and a retry policy
//! short enough for tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use eventcoder::{InputRecord, RetryPolicy};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MUMBAI_TITLE: &str = "Workers strike over wages";
pub const MUMBAI_ABSTRACT: &str = "Thousands of factory workers in Mumbai stopped work demanding higher pay";

/// Records with the given titles, all published 1923-05-01.
pub fn records(titles: &[&str]) -> Vec<InputRecord> {
    let date = NaiveDate::from_ymd_opt(1923, 5, 1).unwrap();
    InputRecord::assign_ids(
        titles
            .iter()
            .map(|t| (t.to_string(), format!("Report: {}", t), date, vec![]))
            .collect(),
    )
}

pub fn mumbai_record() -> InputRecord {
    InputRecord::assign_ids(vec![(
        MUMBAI_TITLE.to_string(),
        MUMBAI_ABSTRACT.to_string(),
        NaiveDate::from_ymd_opt(1923, 5, 1).unwrap(),
        vec![],
    )])
    .remove(0)
}

/// `n` distinct titles: "story 0", "story 1", ...
pub fn titles(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("story {}", i)).collect()
}

/// No jitter, millisecond delays.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(50),
        jitter: false,
        ..RetryPolicy::default()
    }
}

/// Write a CSV file with the given header and rows.
pub fn write_csv(dir: &Path, name: &str, header: &[&str], rows: &[Vec<&str>]) -> PathBuf {
    let path = dir.join(name);
    let mut writer = csv::Writer::from_path(&path).unwrap();
    writer.write_record(header).unwrap();
    for row in rows {
        writer.write_record(row).unwrap();
    }
    writer.flush().unwrap();
    path
}

/// Read an output CSV as one column-name → value map per row.
pub fn read_output(path: &Path) -> Vec<HashMap<String, String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    reader
        .records()
        .map(|r| {
            let r = r.unwrap();
            headers
                .iter()
                .cloned()
                .zip(r.iter().map(String::from))
                .collect()
        })
        .collect()
}
