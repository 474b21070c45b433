//! Typed column extraction for raw records.
//!
//! Every accessor returns a [`DataError`] instead of panicking so that a
//! single malformed record can be skipped and counted without aborting the
//! stage that is folding it.

use thiserror::Error;

use crate::engine::window::TimeUnit;

use super::stats::SkipReason;
use super::{ColumnLookup, Value};

/// Per-record data problems. Always recovered locally (skip + count).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("missing column: {column}")]
    MissingColumn { column: String },

    #[error("column {column}: expected a number, found {found}")]
    NonNumeric { column: String, found: &'static str },

    #[error("column {column}: invalid timestamp {value}")]
    InvalidTimestamp { column: String, value: f64 },

    #[error("line {line}: malformed record: {reason}")]
    Malformed { line: usize, reason: String },
}

impl DataError {
    /// Skip-accounting bucket for this error.
    pub fn reason(&self) -> SkipReason {
        match self {
            Self::MissingColumn { .. } => SkipReason::MissingColumn,
            Self::NonNumeric { .. } => SkipReason::NonNumeric,
            Self::InvalidTimestamp { .. } => SkipReason::InvalidTimestamp,
            Self::Malformed { .. } => SkipReason::Malformed,
        }
    }

    /// Offending column, when the error is attributable to one.
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::MissingColumn { column }
            | Self::NonNumeric { column, .. }
            | Self::InvalidTimestamp { column, .. } => Some(column),
            Self::Malformed { .. } => None,
        }
    }
}

/// Returns the value of a column that must be present (null is allowed).
pub fn require<'a, R: ColumnLookup + ?Sized>(
    record: &'a R,
    column: &str,
) -> Result<&'a Value, DataError> {
    record.column(column).ok_or_else(|| DataError::MissingColumn {
        column: column.to_string(),
    })
}

/// Reads a numeric column. `Null` yields `Ok(None)`; any other
/// non-numeric value is a [`DataError::NonNumeric`].
pub fn numeric<R: ColumnLookup + ?Sized>(
    record: &R,
    column: &str,
) -> Result<Option<f64>, DataError> {
    let value = require(record, column)?;
    match value {
        Value::Null => Ok(None),
        Value::Int(_) | Value::Float(_) => Ok(value.as_f64()),
        other => Err(DataError::NonNumeric {
            column: column.to_string(),
            found: other.type_name(),
        }),
    }
}

/// Reads the timestamp column and converts it to seconds.
pub fn timestamp_seconds<R: ColumnLookup + ?Sized>(
    record: &R,
    column: &str,
    unit: TimeUnit,
) -> Result<f64, DataError> {
    match numeric(record, column)? {
        Some(raw) => Ok(unit.to_seconds(raw)),
        None => Err(DataError::NonNumeric {
            column: column.to_string(),
            found: "null",
        }),
    }
}
