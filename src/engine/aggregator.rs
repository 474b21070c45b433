//! Staged group-by/reduce over records or previously aggregated rows.
//!
//! A stage runs in two parallel phases on its own rayon pool of `workers`
//! threads. Parse tasks take contiguous chunks of the input, resolve each
//! record's [`Dimension`] and reduction inputs, and route the result to a
//! partition chosen by a deterministic hash of the dimension. Fold tasks
//! then each own one partition and reduce it without locks. Because chunks are concatenated in input order
//! before folding, every group sees its records in input order, so float
//! reductions are bit-identical across runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use thiserror::Error;

use crate::record::filter::{matches_all, Predicate};
use crate::record::parse::{numeric, DataError};
use crate::record::stats::{SkipReport, SkipStats};
use crate::record::{ColumnLookup, Value};

use super::aggregate::{Accumulator, GaugeAggregate, LatencyAggregate};
use super::dimension::{missing_from, Dimension, GroupBy};
use super::sketch::Quantile;
use super::table::{Field, FieldType, Row, Schema, SchemaError, Table};
use super::window::WINDOW_COLUMN;

/// Stage construction and execution errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error("stage {stage}: group key set is empty")]
    EmptyGroupKey { stage: String },

    #[error("stage {stage}: output column {column} declared twice")]
    DuplicateOutput { stage: String, column: String },

    #[error("stage {stage}: re-aggregation would widen grouping; not input keys: {missing:?}")]
    WideningGroup { stage: String, missing: Vec<String> },

    #[error("stage {stage}: already-aggregated rows cannot be re-windowed")]
    Rewindow { stage: String },

    #[error("stage {stage}: building worker pool: {reason}")]
    ThreadPool { stage: String, reason: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Reduction function applied per output metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    /// Fold into a quantile sketch; finalized into a summary.
    Quantiles,
}

impl ReduceOp {
    pub fn output_type(self) -> FieldType {
        match self {
            Self::Count => FieldType::Int,
            Self::Quantiles => FieldType::Summary,
            Self::Sum | Self::Mean | Self::Min | Self::Max => FieldType::Float,
        }
    }

    fn accumulator(self) -> Accumulator {
        match self {
            Self::Quantiles => Accumulator::Latency(LatencyAggregate::new()),
            _ => Accumulator::Gauge(GaugeAggregate::new()),
        }
    }
}

/// What a reduction consumes from each record.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Every record contributes 1.0.
    Rows,
    /// A numeric column; nulls are ignored.
    Column(String),
    /// 1.0 when the predicate holds, else 0.0; null when the column is null.
    Predicate(Predicate),
}

impl Input {
    fn read<R: ColumnLookup + ?Sized>(&self, record: &R) -> Result<Option<f64>, DataError> {
        match self {
            Self::Rows => Ok(Some(1.0)),
            Self::Column(column) => numeric(record, column),
            Self::Predicate(predicate) => predicate.indicator(record),
        }
    }

    fn column(&self) -> Option<&str> {
        match self {
            Self::Rows => None,
            Self::Column(c) => Some(c),
            Self::Predicate(p) => Some(&p.column),
        }
    }
}

/// One output metric of a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub output: String,
    pub input: Input,
    pub op: ReduceOp,
}

impl Reduction {
    pub fn new(output: impl Into<String>, input: Input, op: ReduceOp) -> Self {
        Self {
            output: output.into(),
            input,
            op,
        }
    }

    /// Number of rows in the group.
    pub fn count(output: impl Into<String>) -> Self {
        Self::new(output, Input::Rows, ReduceOp::Count)
    }

    /// `op` over a numeric column.
    pub fn of(output: impl Into<String>, column: impl Into<String>, op: ReduceOp) -> Self {
        Self::new(output, Input::Column(column.into()), op)
    }
}

/// Result of running one stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub table: Table,
    pub input_rows: usize,
    /// Rows excluded by the stage's population filter.
    pub filtered: usize,
    pub skipped: SkipReport,
    pub elapsed: Duration,
}

struct Parsed {
    dim: Dimension,
    inputs: Box<[Option<f64>]>,
}

/// A single group-by/reduce stage.
#[derive(Debug, Clone)]
pub struct Aggregator {
    stage: String,
    group_by: GroupBy,
    population: Vec<Predicate>,
    reductions: Vec<Reduction>,
    quantiles: Vec<Quantile>,
    workers: usize,
}

impl Aggregator {
    pub fn new(
        stage: impl Into<String>,
        group_by: GroupBy,
        reductions: Vec<Reduction>,
    ) -> Result<Self, AggregateError> {
        let stage = stage.into();

        let keys = group_by.output_names();
        if keys.is_empty() {
            return Err(AggregateError::EmptyGroupKey { stage });
        }

        let mut seen: Vec<&str> = keys.clone();
        for reduction in &reductions {
            if seen.contains(&reduction.output.as_str()) {
                return Err(AggregateError::DuplicateOutput {
                    stage,
                    column: reduction.output.clone(),
                });
            }
            seen.push(&reduction.output);
        }

        Ok(Self {
            stage,
            group_by,
            population: Vec::new(),
            reductions,
            quantiles: Vec::new(),
            workers: 1,
        })
    }

    /// Restricts the stage to records matching every predicate.
    pub fn with_population(mut self, population: Vec<Predicate>) -> Self {
        self.population = population;
        self
    }

    /// Quantile labels extracted by `Quantiles` reductions.
    pub fn with_quantiles(mut self, quantiles: Vec<Quantile>) -> Self {
        self.quantiles = quantiles;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn group_by(&self) -> &GroupBy {
        &self.group_by
    }

    /// Aggregates raw records.
    pub fn run<R: ColumnLookup + Sync>(&self, inputs: &[R]) -> Result<StageOutput, AggregateError> {
        self.execute(inputs, None)
    }

    /// Re-aggregates a previous stage's rows at a coarser grain.
    ///
    /// The grouping columns must be a subset of the input table's key
    /// columns: re-aggregation narrows grouping, never widens it.
    pub fn reaggregate(&self, table: &Table) -> Result<StageOutput, AggregateError> {
        if self.group_by.is_windowed() {
            return Err(AggregateError::Rewindow {
                stage: self.stage.clone(),
            });
        }

        let input_keys = table.schema().key_names();
        let missing = missing_from(self.group_by.column_names(), &input_keys);
        if !missing.is_empty() {
            return Err(AggregateError::WideningGroup {
                stage: self.stage.clone(),
                missing: missing.into_iter().map(String::from).collect(),
            });
        }

        let referenced = self
            .reductions
            .iter()
            .filter_map(|r| r.input.column())
            .chain(self.population.iter().map(|p| p.column.as_str()));
        for column in referenced {
            if !table.schema().contains(column) {
                return Err(SchemaError::UnknownColumn(column.to_string()).into());
            }
        }

        let key_types: Vec<FieldType> = self
            .group_by
            .column_names()
            .iter()
            .map(|c| table.schema().field(c).map_or(FieldType::Dynamic, |f| f.ty))
            .collect();

        let views: Vec<_> = table.views().collect();
        self.execute(&views, Some(key_types))
    }

    fn execute<R: ColumnLookup + Sync>(
        &self,
        inputs: &[R],
        key_types: Option<Vec<FieldType>>,
    ) -> Result<StageOutput, AggregateError> {
        let started = Instant::now();
        let stats = SkipStats::new();
        let filtered = AtomicUsize::new(0);

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("letagg-worker-{i}"))
            .build()
            .map_err(|err| AggregateError::ThreadPool {
                stage: self.stage.clone(),
                reason: err.to_string(),
            })?;
        let mut groups = pool.install(|| {
            let routed = self.parse_and_route(inputs, &stats, &filtered);
            self.fold_partitions(routed)
        });
        let table = self.build_table(&mut groups, key_types)?;

        let skipped = stats.take();
        let output = StageOutput {
            input_rows: inputs.len(),
            filtered: filtered.load(Ordering::Relaxed),
            skipped,
            elapsed: started.elapsed(),
            table,
        };

        tracing::debug!(
            stage = %self.stage,
            input_rows = output.input_rows,
            filtered = output.filtered,
            groups = output.table.len(),
            elapsed_us = output.elapsed.as_micros() as u64,
            "stage complete",
        );
        if !output.skipped.is_empty() {
            tracing::warn!(
                stage = %self.stage,
                skipped = output.skipped.total(),
                columns = %output.skipped.columns_summary(),
                "skipped malformed records",
            );
        }

        Ok(output)
    }

    /// Phase 1: parse chunks in parallel, route each parsed record to its
    /// partition. Returns `partitions[p]` holding per-chunk vectors in
    /// chunk order.
    fn parse_and_route<R: ColumnLookup + Sync>(
        &self,
        inputs: &[R],
        stats: &SkipStats,
        filtered: &AtomicUsize,
    ) -> Vec<Vec<Vec<Parsed>>> {
        let workers = self.workers;
        let chunk_size = inputs.len().div_ceil(workers).max(1);

        // `collect` on an indexed parallel iterator keeps chunk order.
        let per_chunk: Vec<Vec<Vec<Parsed>>> = inputs
            .par_chunks(chunk_size)
            .map(|chunk| {
                let mut out: Vec<Vec<Parsed>> = (0..workers).map(|_| Vec::new()).collect();
                for record in chunk {
                    match self.parse_one(record) {
                        Ok(Some(parsed)) => {
                            let p = parsed.dim.partition(workers);
                            out[p].push(parsed);
                        }
                        Ok(None) => {
                            filtered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            tracing::trace!(stage = %self.stage, error = %err, "skipping record");
                            stats.record(&err);
                        }
                    }
                }
                out
            })
            .collect();

        let mut partitions: Vec<Vec<Vec<Parsed>>> = (0..workers).map(|_| Vec::new()).collect();
        for chunk in per_chunk {
            for (p, parsed) in chunk.into_iter().enumerate() {
                partitions[p].push(parsed);
            }
        }
        partitions
    }

    fn parse_one<R: ColumnLookup + ?Sized>(&self, record: &R) -> Result<Option<Parsed>, DataError> {
        if !matches_all(&self.population, record)? {
            return Ok(None);
        }

        let dim = self.group_by.extract(record)?;
        let inputs = self
            .reductions
            .iter()
            .map(|r| r.input.read(record))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Parsed {
            dim,
            inputs: inputs.into_boxed_slice(),
        }))
    }

    /// Phase 2: each worker folds the partition it owns, then finalizes
    /// its groups into output values.
    fn fold_partitions(&self, partitions: Vec<Vec<Vec<Parsed>>>) -> Vec<(Dimension, Vec<Value>)> {
        partitions
            .into_par_iter()
            .map(|partition| self.fold_partition(partition))
            .flatten_iter()
            .collect()
    }

    fn fold_partition(&self, partition: Vec<Vec<Parsed>>) -> Vec<(Dimension, Vec<Value>)> {
        let mut groups: HashMap<Dimension, Vec<Accumulator>> = HashMap::new();

        for parsed in partition.into_iter().flatten() {
            let accs = groups.entry(parsed.dim).or_insert_with(|| {
                self.reductions
                    .iter()
                    .map(|r| r.op.accumulator())
                    .collect()
            });
            for (acc, value) in accs.iter_mut().zip(parsed.inputs.iter()) {
                if let Some(v) = value {
                    acc.record(*v);
                }
            }
        }

        groups
            .into_iter()
            .map(|(dim, accs)| {
                let values = self
                    .reductions
                    .iter()
                    .zip(accs.iter())
                    .map(|(r, acc)| self.finalize(r.op, acc))
                    .collect();
                (dim, values)
            })
            .collect()
    }

    fn finalize(&self, op: ReduceOp, acc: &Accumulator) -> Value {
        match acc {
            Accumulator::Latency(agg) => agg
                .summarize(&self.quantiles)
                .map_or(Value::Null, |s| Value::Summary(Arc::new(s))),
            Accumulator::Gauge(agg) => {
                let snap = agg.snapshot();
                match op {
                    ReduceOp::Count => Value::Int(snap.count as i64),
                    ReduceOp::Sum => Value::from_opt_f64((snap.count > 0).then_some(snap.sum)),
                    ReduceOp::Mean => Value::from_opt_f64(snap.mean()),
                    ReduceOp::Min => Value::from_opt_f64(snap.min),
                    ReduceOp::Max => Value::from_opt_f64(snap.max),
                    ReduceOp::Quantiles => Value::Null,
                }
            }
        }
    }

    fn build_table(
        &self,
        groups: &mut Vec<(Dimension, Vec<Value>)>,
        key_types: Option<Vec<FieldType>>,
    ) -> Result<Table, AggregateError> {
        let key_columns = self.group_by.column_names();
        let key_types = key_types.unwrap_or_else(|| {
            (0..key_columns.len())
                .map(|i| FieldType::infer(groups.iter().filter_map(|(d, _)| d.key.get(i))))
                .collect()
        });

        let mut fields = Vec::with_capacity(key_columns.len() + self.reductions.len() + 1);
        if self.group_by.is_windowed() {
            fields.push(Field::key(WINDOW_COLUMN, FieldType::Int));
        }
        for (name, ty) in key_columns.iter().zip(key_types) {
            fields.push(Field::key(name.clone(), ty));
        }
        for r in &self.reductions {
            fields.push(Field::metric(r.output.clone(), r.op.output_type()));
        }
        let schema = Schema::new(fields)?;

        let rows = groups
            .drain(..)
            .map(|(dim, metrics)| {
                let mut values = Vec::with_capacity(schema.len());
                if let Some(w) = dim.window {
                    values.push(Value::Int(w));
                }
                values.extend(dim.key.into_vec());
                values.extend(metrics);
                Row(values)
            })
            .collect();

        let mut table = Table::new(schema, rows)?;
        table.sort_by_keys();
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::window::{TimeUnit, WindowAssigner, WindowSize};
    use crate::record::filter::CompareOp;
    use crate::record::stats::SkipReason;
    use crate::record::Record;

    fn req(pod: &str, t: i64, latency: f64, status: i64) -> Record {
        [
            ("pod", Value::from(pod)),
            ("time_", Value::Int(t)),
            ("latency", Value::Float(latency)),
            ("status", Value::Int(status)),
        ]
        .into_iter()
        .collect()
    }

    fn windowed(cols: &[&str]) -> GroupBy {
        GroupBy::windowed(
            cols.iter().map(|c| c.to_string()).collect(),
            WindowAssigner::new(
                "time_",
                TimeUnit::Seconds,
                WindowSize::new(10).expect("non-zero"),
            ),
        )
    }

    fn quantiles() -> Vec<Quantile> {
        ["p50", "p90", "p99"]
            .iter()
            .map(|l| l.parse().expect("valid"))
            .collect()
    }

    #[test]
    fn test_basic_reductions() {
        let records = vec![
            req("a", 1, 10.0, 200),
            req("a", 2, 30.0, 500),
            req("a", 3, 20.0, 200),
            req("b", 4, 5.0, 200),
        ];
        let agg = Aggregator::new(
            "basic",
            windowed(&["pod"]),
            vec![
                Reduction::count("n"),
                Reduction::of("sum", "latency", ReduceOp::Sum),
                Reduction::of("mean", "latency", ReduceOp::Mean),
                Reduction::of("min", "latency", ReduceOp::Min),
                Reduction::of("max", "latency", ReduceOp::Max),
            ],
        )
        .expect("stage");

        let out = agg.run(&records).expect("run");
        assert_eq!(out.table.len(), 2);
        assert_eq!(out.input_rows, 4);

        let a = out.table.find(&[("pod", Value::from("a"))]).expect("a");
        assert_eq!(a.get(WINDOW_COLUMN), Some(&Value::Int(0)));
        assert_eq!(a.get("n"), Some(&Value::Int(3)));
        assert_eq!(a.get("sum"), Some(&Value::Float(60.0)));
        assert_eq!(a.get("mean"), Some(&Value::Float(20.0)));
        assert_eq!(a.get("min"), Some(&Value::Float(10.0)));
        assert_eq!(a.get("max"), Some(&Value::Float(30.0)));
    }

    #[test]
    fn test_predicate_mean_and_population() {
        let records = vec![req("a", 1, 5.0, 200), req("a", 2, 8000.0, 500)];
        let is_error = Predicate::new("status", CompareOp::Ge, 400);

        let all = Aggregator::new(
            "all",
            windowed(&["pod"]),
            vec![Reduction::new("errors", Input::Predicate(is_error), ReduceOp::Mean)],
        )
        .expect("stage")
        .run(&records)
        .expect("run");
        let row = all.table.find(&[("pod", Value::from("a"))]).expect("a");
        assert_eq!(row.get("errors"), Some(&Value::Float(0.5)));

        let ok = Aggregator::new(
            "ok",
            windowed(&["pod"]),
            vec![Reduction::of("latency", "latency", ReduceOp::Quantiles)],
        )
        .expect("stage")
        .with_population(vec![Predicate::new("status", CompareOp::Lt, 400)])
        .with_quantiles(quantiles())
        .run(&records)
        .expect("run");
        assert_eq!(ok.filtered, 1);
        let row = ok.table.find(&[("pod", Value::from("a"))]).expect("a");
        let summary = row.get("latency").and_then(Value::as_summary).expect("summary");
        assert_eq!(summary.get("p50"), Ok(5.0));
    }

    #[test]
    fn test_malformed_records_skipped_and_counted() {
        let mut records = vec![req("a", 1, 10.0, 200)];
        records.push([("pod", Value::from("a")), ("time_", Value::Int(2))]
            .into_iter()
            .collect());
        records.push(
            [
                ("pod", Value::from("a")),
                ("time_", Value::Int(-3)),
                ("latency", Value::Float(1.0)),
            ]
            .into_iter()
            .collect(),
        );
        records.push(
            [
                ("pod", Value::from("a")),
                ("time_", Value::Int(3)),
                ("latency", Value::from("slow")),
            ]
            .into_iter()
            .collect(),
        );

        let out = Aggregator::new(
            "skips",
            windowed(&["pod"]),
            vec![Reduction::of("sum", "latency", ReduceOp::Sum)],
        )
        .expect("stage")
        .run(&records)
        .expect("run");

        assert_eq!(out.skipped.total(), 3);
        assert_eq!(out.skipped.count(SkipReason::MissingColumn), 1);
        assert_eq!(out.skipped.count(SkipReason::InvalidTimestamp), 1);
        assert_eq!(out.skipped.count(SkipReason::NonNumeric), 1);
        let row = out.table.find(&[("pod", Value::from("a"))]).expect("a");
        assert_eq!(row.get("sum"), Some(&Value::Float(10.0)));
    }

    #[test]
    fn test_no_rows_for_empty_groups() {
        let records = vec![req("a", 1, 1.0, 200), req("a", 35, 1.0, 200)];
        let out = Aggregator::new("sparse", windowed(&["pod"]), vec![Reduction::count("n")])
            .expect("stage")
            .run(&records)
            .expect("run");
        let windows: Vec<_> = out.table.column_values(WINDOW_COLUMN).expect("col");
        assert_eq!(windows, vec![&Value::Int(0), &Value::Int(30)]);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let records: Vec<Record> = (0..2_000)
            .map(|i| {
                req(
                    &format!("pod-{}", i % 17),
                    i64::from(i % 95),
                    f64::from(i) * 0.1,
                    200,
                )
            })
            .collect();
        let build = |workers| {
            Aggregator::new(
                "par",
                windowed(&["pod"]),
                vec![
                    Reduction::count("n"),
                    Reduction::of("mean", "latency", ReduceOp::Mean),
                    Reduction::of("lat", "latency", ReduceOp::Quantiles),
                ],
            )
            .expect("stage")
            .with_quantiles(quantiles())
            .with_workers(workers)
        };

        let serial = build(1).run(&records).expect("serial");
        let parallel = build(8).run(&records).expect("parallel");
        assert_eq!(serial.table, parallel.table);
    }

    #[test]
    fn test_reaggregate_narrows() {
        let records: Vec<Record> = vec![
            [
                ("upid", Value::Int(1)),
                ("pod", Value::from("p")),
                ("time_", Value::Int(1)),
                ("rss", Value::Float(100.0)),
            ]
            .into_iter()
            .collect(),
            [
                ("upid", Value::Int(1)),
                ("pod", Value::from("p")),
                ("time_", Value::Int(2)),
                ("rss", Value::Float(300.0)),
            ]
            .into_iter()
            .collect(),
            [
                ("upid", Value::Int(2)),
                ("pod", Value::from("p")),
                ("time_", Value::Int(3)),
                ("rss", Value::Float(50.0)),
            ]
            .into_iter()
            .collect(),
        ];

        let per_process = Aggregator::new(
            "process",
            windowed(&["upid", "pod"]),
            vec![Reduction::of("rss", "rss", ReduceOp::Mean)],
        )
        .expect("stage")
        .run(&records)
        .expect("run");
        assert_eq!(per_process.table.len(), 2);

        let per_pod = Aggregator::new(
            "pod",
            GroupBy::columns(vec![WINDOW_COLUMN.to_string(), "pod".to_string()]),
            vec![Reduction::of("rss", "rss", ReduceOp::Sum)],
        )
        .expect("stage")
        .reaggregate(&per_process.table)
        .expect("reaggregate");

        assert_eq!(per_pod.table.len(), 1);
        let row = per_pod.table.find(&[("pod", Value::from("p"))]).expect("p");
        assert_eq!(row.get("rss"), Some(&Value::Float(250.0)));
        assert_eq!(
            per_pod.table.schema().field("pod").map(|f| f.ty),
            Some(FieldType::Str)
        );
    }

    #[test]
    fn test_reaggregate_rejects_widening() {
        let out = Aggregator::new("pod", windowed(&["pod"]), vec![Reduction::count("n")])
            .expect("stage")
            .run(&[req("a", 1, 1.0, 200)])
            .expect("run");

        let err = Aggregator::new(
            "wider",
            GroupBy::columns(vec!["pod".to_string(), "service".to_string()]),
            vec![Reduction::of("n", "n", ReduceOp::Sum)],
        )
        .expect("stage")
        .reaggregate(&out.table)
        .unwrap_err();
        assert_eq!(
            err,
            AggregateError::WideningGroup {
                stage: "wider".to_string(),
                missing: vec!["service".to_string()],
            }
        );
    }

    #[test]
    fn test_reaggregate_rejects_rewindow_and_unknown_input() {
        let out = Aggregator::new("pod", windowed(&["pod"]), vec![Reduction::count("n")])
            .expect("stage")
            .run(&[req("a", 1, 1.0, 200)])
            .expect("run");

        let err = Aggregator::new("again", windowed(&["pod"]), vec![Reduction::count("m")])
            .expect("stage")
            .reaggregate(&out.table)
            .unwrap_err();
        assert!(matches!(err, AggregateError::Rewindow { .. }));

        let err = Aggregator::new(
            "unknown",
            GroupBy::columns(vec!["pod".to_string()]),
            vec![Reduction::of("x", "nope", ReduceOp::Sum)],
        )
        .expect("stage")
        .reaggregate(&out.table)
        .unwrap_err();
        assert_eq!(
            err,
            AggregateError::Schema(SchemaError::UnknownColumn("nope".to_string()))
        );
    }

    #[test]
    fn test_construction_errors() {
        assert!(matches!(
            Aggregator::new("empty", GroupBy::columns(Vec::new()), vec![Reduction::count("n")]),
            Err(AggregateError::EmptyGroupKey { .. })
        ));
        assert!(matches!(
            Aggregator::new(
                "dup",
                windowed(&["pod"]),
                vec![Reduction::count("pod")]
            ),
            Err(AggregateError::DuplicateOutput { .. })
        ));
    }

    #[test]
    fn test_nulls_ignored_in_reaggregation() {
        let schema = Schema::new(vec![
            Field::key("pod", FieldType::Str),
            Field::key(WINDOW_COLUMN, FieldType::Int),
            Field::metric("lat", FieldType::Float),
        ])
        .expect("schema");
        let table = Table::new(
            schema,
            vec![
                Row(vec![Value::from("a"), Value::Int(0), Value::Float(4.0)]),
                Row(vec![Value::from("a"), Value::Int(10), Value::Null]),
                Row(vec![Value::from("b"), Value::Int(0), Value::Null]),
            ],
        )
        .expect("table");

        let out = Aggregator::new(
            "summary",
            GroupBy::columns(vec!["pod".to_string()]),
            vec![
                Reduction::of("lat", "lat", ReduceOp::Mean),
                Reduction::count("windows"),
            ],
        )
        .expect("stage")
        .reaggregate(&table)
        .expect("run");

        let a = out.table.find(&[("pod", Value::from("a"))]).expect("a");
        assert_eq!(a.get("lat"), Some(&Value::Float(4.0)));
        assert_eq!(a.get("windows"), Some(&Value::Int(2)));
        let b = out.table.find(&[("pod", Value::from("b"))]).expect("b");
        assert_eq!(b.get("lat"), Some(&Value::Null));
    }
}
