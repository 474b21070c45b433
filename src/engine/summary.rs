use serde::Deserialize;

use super::aggregator::{AggregateError, Aggregator, ReduceOp, Reduction, StageOutput};
use super::dimension::GroupBy;
use super::table::Table;

/// Column holding the number of windows folded into a summary row.
pub const WINDOW_COUNT_COLUMN: &str = "window_count";

/// How a time-series metric collapses across windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryOp {
    /// For already-normalized metrics (rates, percentages, quantiles).
    Mean,
    /// For absolute totals (request counts).
    Sum,
}

impl SummaryOp {
    fn reduce_op(self) -> ReduceOp {
        match self {
            Self::Mean => ReduceOp::Mean,
            Self::Sum => ReduceOp::Sum,
        }
    }
}

/// Collapses a per-window series into one row per entity.
///
/// Runs as a re-aggregation that drops the window key, so the same input
/// table always yields the same rows.
#[derive(Debug, Clone)]
pub struct Summarizer {
    group_by: Vec<String>,
    metrics: Vec<(String, SummaryOp)>,
    workers: usize,
}

impl Summarizer {
    pub fn new(group_by: Vec<String>, metrics: Vec<(String, SummaryOp)>) -> Self {
        Self {
            group_by,
            metrics,
            workers: 1,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn summarize(&self, series: &Table) -> Result<StageOutput, AggregateError> {
        let mut reductions: Vec<Reduction> = self
            .metrics
            .iter()
            .map(|(name, op)| Reduction::of(name.clone(), name.clone(), op.reduce_op()))
            .collect();
        reductions.push(Reduction::count(WINDOW_COUNT_COLUMN));

        Aggregator::new("summary", GroupBy::columns(self.group_by.clone()), reductions)?
            .with_workers(self.workers)
            .reaggregate(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::table::{Field, FieldType, Row, Schema};
    use crate::engine::window::WINDOW_COLUMN;
    use crate::record::Value;

    fn series() -> Table {
        let schema = Schema::new(vec![
            Field::key(WINDOW_COLUMN, FieldType::Int),
            Field::key("pod", FieldType::Str),
            Field::metric("request_count", FieldType::Int),
            Field::metric("requests_per_s", FieldType::Float),
        ])
        .expect("schema");

        let mut rows = Vec::new();
        for w in 0..5 {
            let n = 10 * (w + 1);
            rows.push(Row(vec![
                Value::Int(w * 10),
                Value::from("pod1"),
                Value::Int(n),
                Value::Float(n as f64 / 10.0),
            ]));
        }
        rows.push(Row(vec![
            Value::Int(0),
            Value::from("pod2"),
            Value::Int(3),
            Value::Float(0.3),
        ]));
        Table::new(schema, rows).expect("table")
    }

    fn summarizer() -> Summarizer {
        Summarizer::new(
            vec!["pod".to_string()],
            vec![
                ("request_count".to_string(), SummaryOp::Sum),
                ("requests_per_s".to_string(), SummaryOp::Mean),
            ],
        )
    }

    #[test]
    fn test_summary_values() {
        let out = summarizer().summarize(&series()).expect("summary");
        assert_eq!(out.table.len(), 2);

        let pod1 = out.table.find(&[("pod", Value::from("pod1"))]).expect("pod1");
        assert_eq!(pod1.get("request_count"), Some(&Value::Float(150.0)));
        assert_eq!(pod1.get("requests_per_s"), Some(&Value::Float(3.0)));
        assert_eq!(pod1.get(WINDOW_COUNT_COLUMN), Some(&Value::Int(5)));
        assert!(!out.table.schema().contains(WINDOW_COLUMN));
    }

    #[test]
    fn test_summary_is_idempotent() {
        let input = series();
        let first = summarizer().with_workers(4).summarize(&input).expect("first");
        let second = summarizer().with_workers(4).summarize(&input).expect("second");
        assert_eq!(first.table, second.table);
    }

    #[test]
    fn test_unknown_metric() {
        let s = Summarizer::new(
            vec!["pod".to_string()],
            vec![("latency_p50".to_string(), SummaryOp::Mean)],
        );
        assert!(matches!(
            s.summarize(&series()),
            Err(AggregateError::Schema(_))
        ));
    }
}
