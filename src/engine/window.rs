use std::num::NonZeroU64;

use serde::Deserialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::record::parse::{timestamp_seconds, DataError};
use crate::record::ColumnLookup;

/// Name of the key column that carries a row's window start (seconds).
pub const WINDOW_COLUMN: &str = "window_start";

/// Unit of the raw timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "us")]
    Microseconds,
    #[default]
    #[serde(rename = "ns")]
    Nanoseconds,
}

impl TimeUnit {
    pub fn to_seconds(self, raw: f64) -> f64 {
        match self {
            Self::Seconds => raw,
            Self::Milliseconds => raw / 1e3,
            Self::Microseconds => raw / 1e6,
            Self::Nanoseconds => raw / 1e9,
        }
    }
}

/// Fixed window duration in whole seconds. Zero is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowSize(NonZeroU64);

impl WindowSize {
    pub fn new(seconds: u64) -> Result<Self, ConfigError> {
        NonZeroU64::new(seconds)
            .map(Self)
            .ok_or(ConfigError::ZeroWindow)
    }

    pub fn seconds(self) -> u64 {
        self.0.get()
    }

    pub fn as_f64(self) -> f64 {
        self.0.get() as f64
    }
}

/// Errors from bucketing a single timestamp.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum WindowError {
    #[error("timestamp is negative: {0}")]
    Negative(f64),

    #[error("timestamp is not finite: {0}")]
    NonFinite(f64),

    #[error("timestamp {0} has no representable window")]
    OutOfRange(f64),
}

/// Returns `floor(ts / W) * W` for a timestamp in seconds.
///
/// The result always satisfies `start <= ts < start + W`, including when
/// the float division rounds across a bucket boundary.
pub fn window_start(ts_secs: f64, size: WindowSize) -> Result<i64, WindowError> {
    if !ts_secs.is_finite() {
        return Err(WindowError::NonFinite(ts_secs));
    }
    if ts_secs < 0.0 {
        return Err(WindowError::Negative(ts_secs));
    }

    let w = size.as_f64();
    let mut k = (ts_secs / w).floor();
    if k * w > ts_secs {
        k -= 1.0;
    } else if (k + 1.0) * w <= ts_secs {
        k += 1.0;
    }

    // 2^63; `k as i64` saturates at and above it.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    let width = i64::try_from(size.seconds()).map_err(|_| WindowError::OutOfRange(ts_secs))?;
    if k >= LIMIT {
        return Err(WindowError::OutOfRange(ts_secs));
    }
    (k as i64)
        .checked_mul(width)
        .filter(|start| start.checked_add(width).is_some())
        .ok_or(WindowError::OutOfRange(ts_secs))
}

/// Assigns records to windows using a configured timestamp column.
#[derive(Debug, Clone)]
pub struct WindowAssigner {
    column: String,
    unit: TimeUnit,
    size: WindowSize,
}

impl WindowAssigner {
    pub fn new(column: impl Into<String>, unit: TimeUnit, size: WindowSize) -> Self {
        Self {
            column: column.into(),
            unit,
            size,
        }
    }

    pub fn size(&self) -> WindowSize {
        self.size
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Window start (seconds) for one record.
    pub fn assign<R: ColumnLookup + ?Sized>(&self, record: &R) -> Result<i64, DataError> {
        let ts = timestamp_seconds(record, &self.column, self.unit)?;
        window_start(ts, self.size).map_err(|_| DataError::InvalidTimestamp {
            column: self.column.clone(),
            value: ts,
        })
    }
}
