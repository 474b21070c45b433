//! JSON-lines record source.
//!
//! The telemetry store is external; this is the thin adapter that turns its
//! export (one JSON object per line) into [`Record`]s.

use std::collections::HashMap;
use std::io::BufRead;

use anyhow::{Context, Result};

use super::parse::DataError;
use super::stats::SkipStats;
use super::{Record, Value};

/// Reads every record from `reader`.
///
/// I/O failures abort. Lines that are not JSON objects are skipped and
/// counted in `stats`. Blank lines are ignored.
pub fn read_json_lines<R: BufRead>(reader: R, stats: &SkipStats) -> Result<Vec<Record>> {
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("reading input line {line_no}"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match parse_line(trimmed, line_no) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::debug!(line = line_no, error = %err, "skipping malformed input line");
                stats.record(&err);
            }
        }
    }

    Ok(records)
}

fn parse_line(line: &str, line_no: usize) -> Result<Record, DataError> {
    let object: HashMap<String, serde_json::Value> =
        serde_json::from_str(line).map_err(|e| DataError::Malformed {
            line: line_no,
            reason: e.to_string(),
        })?;

    Ok(object
        .into_iter()
        .map(|(k, v)| (k, Value::from(v)))
        .collect())
}
