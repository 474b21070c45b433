use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::record::parse::{require, DataError};
use crate::record::{ColumnLookup, Value};

use super::window::{WindowAssigner, WINDOW_COLUMN};

/// Group identity of an aggregate row: optional window start plus the
/// ordered values of the grouping columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dimension {
    pub window: Option<i64>,
    pub key: Box<[Value]>,
}

impl Dimension {
    /// Deterministic partition index in `0..partitions`.
    ///
    /// Uses a fixed-key hasher so that the same key always lands on the
    /// same worker, run after run.
    pub fn partition(&self, partitions: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        (hasher.finish() % partitions.max(1) as u64) as usize
    }
}

/// How a stage derives a [`Dimension`] from its input.
#[derive(Debug, Clone)]
pub struct GroupBy {
    columns: Vec<String>,
    window: Option<WindowAssigner>,
}

impl GroupBy {
    /// Groups by `columns`, bucketing each record into a window first.
    pub fn windowed(columns: Vec<String>, window: WindowAssigner) -> Self {
        Self {
            columns,
            window: Some(window),
        }
    }

    /// Groups by `columns` only. Include [`WINDOW_COLUMN`] to regroup
    /// already-windowed rows.
    pub fn columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            window: None,
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn is_windowed(&self) -> bool {
        self.window.is_some()
    }

    /// Output key column names, window first when windowing is applied.
    pub fn output_names(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(self.columns.len() + 1);
        if self.window.is_some() {
            names.push(WINDOW_COLUMN);
        }
        names.extend(self.columns.iter().map(String::as_str));
        names
    }

    /// Extracts the group identity of one record.
    pub fn extract<R: ColumnLookup + ?Sized>(&self, record: &R) -> Result<Dimension, DataError> {
        let window = match &self.window {
            Some(assigner) => Some(assigner.assign(record)?),
            None => None,
        };

        let key = self
            .columns
            .iter()
            .map(|column| require(record, column).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Dimension {
            window,
            key: key.into_boxed_slice(),
        })
    }
}

/// Columns of `narrow` that are absent from `wide`.
pub fn missing_from<'a>(narrow: &'a [String], wide: &[&str]) -> Vec<&'a str> {
    narrow
        .iter()
        .map(String::as_str)
        .filter(|c| !wide.contains(c))
        .collect()
}
