use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::parse::DataError;

/// Category of a skipped record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SkipReason {
    MissingColumn = 0,
    NonNumeric = 1,
    InvalidTimestamp = 2,
    Malformed = 3,
}

const NUM_REASONS: usize = 4;

impl SkipReason {
    /// Returns the canonical metric/log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingColumn => "missing_column",
            Self::NonNumeric => "non_numeric",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::Malformed => "malformed",
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::MissingColumn),
            1 => Some(Self::NonNumeric),
            2 => Some(Self::InvalidTimestamp),
            3 => Some(Self::Malformed),
            _ => None,
        }
    }
}

/// Lock-free skipped-record counters, safe to share across stage workers.
///
/// Per-reason totals are plain atomics; the per-column breakdown goes
/// through a `DashMap` so workers never contend on a global lock.
pub struct SkipStats {
    counts: [AtomicU64; NUM_REASONS],
    by_column: DashMap<String, u64>,
}

impl SkipStats {
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            by_column: DashMap::new(),
        }
    }

    /// Count one skipped record.
    pub fn record(&self, err: &DataError) {
        if let Some(counter) = self.counts.get(err.reason() as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(column) = err.column() {
            *self.by_column.entry(column.to_string()).or_insert(0) += 1;
        }
    }

    /// Total skipped so far.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Read and reset all counters, returning only non-zero entries.
    pub fn take(&self) -> SkipReport {
        let mut by_reason = Vec::new();
        for (i, counter) in self.counts.iter().enumerate() {
            let v = counter.swap(0, Ordering::Relaxed);
            if v > 0 {
                if let Some(reason) = SkipReason::from_u8(i as u8) {
                    by_reason.push((reason, v));
                }
            }
        }

        let mut by_column: Vec<(String, u64)> = self
            .by_column
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        self.by_column.clear();
        by_column.sort();

        SkipReport {
            by_reason,
            by_column,
        }
    }
}

impl Default for SkipStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of skipped records for one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipReport {
    pub by_reason: Vec<(SkipReason, u64)>,
    /// Sorted by column name.
    pub by_column: Vec<(String, u64)>,
}

impl SkipReport {
    pub fn total(&self) -> u64 {
        self.by_reason.iter().map(|(_, n)| n).sum()
    }

    pub fn count(&self, reason: SkipReason) -> u64 {
        self.by_reason
            .iter()
            .find(|(r, _)| *r == reason)
            .map_or(0, |(_, n)| *n)
    }

    pub fn is_empty(&self) -> bool {
        self.by_reason.is_empty()
    }

    /// Per-column breakdown as `column=count` pairs, for log fields.
    pub fn columns_summary(&self) -> String {
        self.by_column
            .iter()
            .map(|(column, n)| format!("{column}={n}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}
