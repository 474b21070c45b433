//! Counter delta reconstruction.
//!
//! Monotonic counters (CPU time, bytes read/written) are sampled one or more
//! times per window. The first pass keeps only the per-group min and max of
//! each counter; the second derives `max - min` and converts it to a rate.
//! Counter resets are not detected: a reset inside a window yields an
//! understated delta.

use serde::Deserialize;

use crate::record::Value;

use super::aggregate::GaugeAggregate;
use super::aggregator::{ReduceOp, Reduction};
use super::rate::RateFormatter;
use super::table::{Field, FieldType, SchemaError, Table};

/// `max - min` over a window's samples; `None` without samples.
/// A single sample yields 0.
pub fn counter_delta(samples: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut agg = GaugeAggregate::new();
    for s in samples {
        agg.record(s);
    }
    let snap = agg.snapshot();
    Some(snap.max? - snap.min?)
}

/// A counter column and the rate column derived from it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CounterSpec {
    /// Raw cumulative counter column.
    pub column: String,
    /// Output rate column.
    pub output: String,
    /// Multiplier applied to the per-second delta.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl CounterSpec {
    pub fn new(column: impl Into<String>, output: impl Into<String>, scale: f64) -> Self {
        Self {
            column: column.into(),
            output: output.into(),
            scale,
        }
    }

    fn min_column(&self) -> String {
        format!("{}__min", self.output)
    }

    fn max_column(&self) -> String {
        format!("{}__max", self.output)
    }

    /// First pass: the min/max reductions over the raw counter.
    pub fn reductions(&self) -> [Reduction; 2] {
        [
            Reduction::of(self.min_column(), self.column.clone(), ReduceOp::Min),
            Reduction::of(self.max_column(), self.column.clone(), ReduceOp::Max),
        ]
    }

    /// Second pass: adds `(max - min) / window * scale` as the output column
    /// and drops the min/max helpers.
    pub fn reconstruct(&self, table: &Table, rates: &RateFormatter) -> Result<Table, SchemaError> {
        let min_col = self.min_column();
        let max_col = self.max_column();
        for col in [&min_col, &max_col] {
            if !table.schema().contains(col) {
                return Err(SchemaError::UnknownColumn(col.clone()));
            }
        }

        let with_rate = table.with_metric::<SchemaError, _>(
            Field::metric(self.output.clone(), FieldType::Float),
            |row| {
                let delta = counter_delta(row.f64(&min_col).into_iter().chain(row.f64(&max_col)));
                Ok(Value::from_opt_f64(
                    delta.map(|d| rates.per_second(d) * self.scale),
                ))
            },
        )?;

        with_rate.drop_metrics(&[min_col.as_str(), max_col.as_str()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aggregator::Aggregator;
    use crate::engine::dimension::GroupBy;
    use crate::engine::window::{TimeUnit, WindowAssigner, WindowSize};
    use crate::record::Record;

    #[test]
    fn test_delta_independent_of_order() {
        assert_eq!(counter_delta([5.0, 5.0, 12.0]), Some(7.0));
        assert_eq!(counter_delta([12.0, 5.0, 5.0]), Some(7.0));
        assert_eq!(counter_delta([5.0, 12.0, 5.0]), Some(7.0));
    }

    #[test]
    fn test_single_sample_is_zero() {
        assert_eq!(counter_delta([42.0]), Some(0.0));
        assert_eq!(counter_delta(std::iter::empty()), None);
    }

    #[test]
    fn test_two_pass_reconstruction() {
        let sample = |t: i64, cpu: f64| -> Record {
            [
                ("upid", Value::Int(7)),
                ("time_", Value::Int(t)),
                ("cpu_ns", Value::Float(cpu)),
            ]
            .into_iter()
            .collect()
        };
        let records = vec![sample(1, 5.0e9), sample(4, 5.0e9), sample(8, 12.0e9)];

        let window = WindowSize::new(10).expect("non-zero");
        let spec = CounterSpec::new("cpu_ns", "cpu_pct", 1e-7);
        let stage = Aggregator::new(
            "counters",
            GroupBy::windowed(
                vec!["upid".to_string()],
                WindowAssigner::new("time_", TimeUnit::Seconds, window),
            ),
            spec.reductions().to_vec(),
        )
        .expect("stage")
        .run(&records)
        .expect("run");

        let out = spec
            .reconstruct(&stage.table, &RateFormatter::new(window))
            .expect("reconstruct");

        assert_eq!(out.schema().metric_names(), vec!["cpu_pct"]);
        let row = out.find(&[("upid", Value::Int(7))]).expect("row");
        // 7e9 ns over 10 s = 0.7 cores = 70%.
        let pct = row.f64("cpu_pct").expect("value");
        assert!((pct - 70.0).abs() < 1e-9, "{pct}");
    }

    #[test]
    fn test_reconstruct_requires_first_pass() {
        let stage = Aggregator::new(
            "none",
            GroupBy::columns(vec!["upid".to_string()]),
            vec![Reduction::count("n")],
        )
        .expect("stage")
        .run(&[[("upid", Value::Int(1))].into_iter().collect::<Record>()])
        .expect("run");

        let spec = CounterSpec::new("cpu_ns", "cpu_pct", 1.0);
        let rates = RateFormatter::new(WindowSize::new(1).expect("non-zero"));
        assert_eq!(
            spec.reconstruct(&stage.table, &rates),
            Err(SchemaError::UnknownColumn("cpu_pct__min".to_string()))
        );
    }
}
