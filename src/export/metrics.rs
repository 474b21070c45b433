use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::engine::aggregator::StageOutput;
use crate::record::stats::SkipReport;

const NAMESPACE: &str = "letagg";

/// Prometheus self-metrics for one engine run.
///
/// All metrics use the "letagg" namespace.
pub struct EngineMetrics {
    registry: Registry,

    /// Records handed to the pipeline.
    pub records_received: IntCounter,
    /// Records removed by `filter_predicates` or a stage population.
    pub records_filtered: IntCounter,
    /// Malformed records skipped, by reason.
    pub records_skipped: IntCounterVec,
    /// Malformed records skipped, by the offending column.
    pub skipped_by_column: IntCounterVec,
    /// Rows produced, by stage.
    pub rows_emitted: IntCounterVec,
    /// Wall time per stage (100us-10s buckets).
    pub stage_duration: HistogramVec,
}

impl EngineMetrics {
    /// Creates a new metrics instance with all metrics registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let records_received = IntCounter::with_opts(
            Opts::new("records_received_total", "Records handed to the pipeline.")
                .namespace(NAMESPACE),
        )?;
        let records_filtered = IntCounter::with_opts(
            Opts::new(
                "records_filtered_total",
                "Records excluded by filter predicates or stage populations.",
            )
            .namespace(NAMESPACE),
        )?;
        let records_skipped = IntCounterVec::new(
            Opts::new(
                "records_skipped_total",
                "Malformed records skipped, by reason.",
            )
            .namespace(NAMESPACE),
            &["reason"],
        )?;
        let skipped_by_column = IntCounterVec::new(
            Opts::new(
                "records_skipped_by_column_total",
                "Malformed records skipped, by offending column.",
            )
            .namespace(NAMESPACE),
            &["column"],
        )?;
        let rows_emitted = IntCounterVec::new(
            Opts::new("rows_emitted_total", "Rows produced, by stage.").namespace(NAMESPACE),
            &["stage"],
        )?;
        let stage_duration = HistogramVec::new(
            HistogramOpts::new("stage_duration_seconds", "Wall time per stage.")
                .namespace(NAMESPACE)
                .buckets(vec![
                    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0,
                ]),
            &["stage"],
        )?;

        registry.register(Box::new(records_received.clone()))?;
        registry.register(Box::new(records_filtered.clone()))?;
        registry.register(Box::new(records_skipped.clone()))?;
        registry.register(Box::new(skipped_by_column.clone()))?;
        registry.register(Box::new(rows_emitted.clone()))?;
        registry.register(Box::new(stage_duration.clone()))?;

        Ok(Self {
            registry,
            records_received,
            records_filtered,
            records_skipped,
            skipped_by_column,
            rows_emitted,
            stage_duration,
        })
    }

    /// Adds a skip report to the per-reason and per-column counters.
    pub fn observe_skips(&self, report: &SkipReport) {
        for (reason, count) in &report.by_reason {
            self.records_skipped
                .with_label_values(&[reason.as_str()])
                .inc_by(*count);
        }
        for (column, count) in &report.by_column {
            self.skipped_by_column
                .with_label_values(&[column.as_str()])
                .inc_by(*count);
        }
    }

    /// Records rows, duration, filtered and skipped counts of one stage.
    pub fn observe_stage(&self, stage: &str, output: &StageOutput) {
        self.rows_emitted
            .with_label_values(&[stage])
            .inc_by(output.table.len() as u64);
        self.stage_duration
            .with_label_values(&[stage])
            .observe(output.elapsed.as_secs_f64());
        self.records_filtered.inc_by(output.filtered as u64);
        self.observe_skips(&output.skipped);
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .context("encoding metrics")?;
        String::from_utf8(buf).context("metrics output is not utf-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::parse::DataError;
    use crate::record::stats::SkipStats;

    #[test]
    fn test_render_includes_namespace_and_labels() {
        let metrics = EngineMetrics::new().expect("metrics");
        metrics.records_received.inc_by(3);

        let stats = SkipStats::new();
        stats.record(&DataError::MissingColumn {
            column: "latency".to_string(),
        });
        metrics.observe_skips(&stats.take());

        let text = metrics.render().expect("render");
        assert!(text.contains("letagg_records_received_total 3"));
        assert!(text.contains("letagg_records_skipped_total{reason=\"missing_column\"} 1"));
        assert!(text.contains("letagg_records_skipped_by_column_total{column=\"latency\"} 1"));
    }

    #[test]
    fn test_stage_skips_reach_column_counter() {
        use crate::engine::aggregator::{Aggregator, ReduceOp, Reduction};
        use crate::engine::dimension::GroupBy;
        use crate::record::{Record, Value};

        let records: Vec<Record> = vec![
            [("pod", Value::from("a")), ("rss", Value::Float(1.0))]
                .into_iter()
                .collect(),
            [("pod", Value::from("a")), ("rss", Value::from("big"))]
                .into_iter()
                .collect(),
            [("pod", Value::from("b"))].into_iter().collect(),
        ];
        let out = Aggregator::new(
            "gauges",
            GroupBy::columns(vec!["pod".to_string()]),
            vec![Reduction::of("rss", "rss", ReduceOp::Mean)],
        )
        .expect("stage")
        .run(&records)
        .expect("run");

        let metrics = EngineMetrics::new().expect("metrics");
        metrics.observe_stage("gauges", &out);
        assert_eq!(
            metrics
                .skipped_by_column
                .with_label_values(&["rss"])
                .get(),
            2
        );
    }
}
