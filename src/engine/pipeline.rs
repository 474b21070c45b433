//! Composed pipelines: raw records in, time-series (and optionally summary)
//! tables out.
//!
//! Both pipelines run the same shape: global filter, one or more
//! aggregation stages, derived columns, then an optional summary.

use serde::Deserialize;

use crate::config::{Config, ConfigError, LetConfig, PipelineConfig, ResourceConfig};
use crate::export::metrics::EngineMetrics;
use crate::record::filter::{matches_all, CompareOp, Predicate};
use crate::record::stats::SkipStats;
use crate::record::ColumnLookup;

use super::aggregator::{Aggregator, Input, ReduceOp, Reduction, StageOutput};
use super::counter::CounterSpec;
use super::dimension::GroupBy;
use super::join::JoinSpec;
use super::quantile::QuantileExtractor;
use super::rate::{RateFormatter, RateSpec};
use super::sketch::Quantile;
use super::summary::{SummaryOp, Summarizer};
use super::table::Table;
use super::window::{WindowAssigner, WindowSize, WINDOW_COLUMN};
use super::EngineError;

const REQUEST_COUNT: &str = "request_count";
const INSTANCE_COUNT: &str = "instance_count";
const LATENCY_PREFIX: &str = "latency";

// Intermediate columns, dropped before output. The `__` marker is rejected
// in configured column names, so these never clash with user columns.
const ERROR_FRACTION: &str = "__error_fraction";
const REQUEST_BYTES: &str = "__request_bytes";
const RESPONSE_BYTES: &str = "__response_bytes";
const LATENCY: &str = "__latency";

/// A point-in-time gauge column averaged per instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GaugeSpec {
    pub column: String,
    pub output: String,
}

/// Tables produced by one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// One row per (window, group).
    pub series: Table,
    /// One row per group, when summarization is enabled.
    pub summary: Option<Table>,
}

/// Settings shared by every pipeline kind.
#[derive(Debug, Clone)]
struct Common {
    assigner: WindowAssigner,
    rates: RateFormatter,
    filter: Vec<Predicate>,
    quantiles: Vec<Quantile>,
    join: JoinSpec,
    workers: usize,
    summarize: bool,
}

impl Common {
    fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let window = cfg.window_size()?;
        Ok(Self {
            assigner: WindowAssigner::new(cfg.timestamp_column.clone(), cfg.timestamp_unit, window),
            rates: RateFormatter::new(window),
            filter: cfg.filter_predicates.clone(),
            quantiles: cfg.resolved_quantiles()?,
            join: JoinSpec::new(cfg.resolved_join_kind()?),
            workers: cfg.workers,
            summarize: cfg.summarize,
        })
    }

    fn windowed(&self, columns: &[String]) -> GroupBy {
        GroupBy::windowed(columns.to_vec(), self.assigner.clone())
    }

    /// Applies `filter_predicates` ahead of every stage.
    fn filter<'a, R: ColumnLookup>(&self, records: &'a [R], metrics: &EngineMetrics) -> Vec<&'a R> {
        metrics.records_received.inc_by(records.len() as u64);
        if self.filter.is_empty() {
            return records.iter().collect();
        }

        let stats = SkipStats::new();
        let mut filtered = 0u64;
        let kept: Vec<&R> = records
            .iter()
            .filter(|record| match matches_all(&self.filter, *record) {
                Ok(keep) => {
                    filtered += u64::from(!keep);
                    keep
                }
                Err(err) => {
                    stats.record(&err);
                    false
                }
            })
            .collect();

        let skipped = stats.take();
        metrics.records_filtered.inc_by(filtered);
        metrics.observe_skips(&skipped);
        tracing::debug!(
            received = records.len(),
            kept = kept.len(),
            filtered,
            skipped = skipped.total(),
            "applied filter predicates",
        );
        if !skipped.is_empty() {
            tracing::warn!(
                skipped = skipped.total(),
                columns = %skipped.columns_summary(),
                "skipped records failing filter evaluation",
            );
        }
        kept
    }

    fn summarize(
        &self,
        series: &Table,
        group_by: &[String],
        sums: &[&str],
        metrics: &EngineMetrics,
    ) -> Result<Option<Table>, EngineError> {
        if !self.summarize {
            return Ok(None);
        }

        let ops = series
            .schema()
            .metric_names()
            .into_iter()
            .map(|name| {
                let op = if sums.contains(&name) {
                    SummaryOp::Sum
                } else {
                    SummaryOp::Mean
                };
                (name.to_string(), op)
            })
            .collect();

        let out = Summarizer::new(group_by.to_vec(), ops)
            .with_workers(self.workers)
            .summarize(series)?;
        metrics.observe_stage("summary", &out);
        Ok(Some(out.table))
    }
}

fn observed(stage: &str, out: StageOutput, metrics: &EngineMetrics) -> Table {
    metrics.observe_stage(stage, &out);
    out.table
}

/// Latency, error rate and throughput per group and window.
#[derive(Debug, Clone)]
pub struct LetPipeline {
    common: Common,
    cfg: LetConfig,
}

impl LetPipeline {
    fn run<R: ColumnLookup + Sync>(
        &self,
        records: &[R],
        metrics: &EngineMetrics,
    ) -> Result<PipelineOutput, EngineError> {
        let common = &self.common;
        let cfg = &self.cfg;
        let group_by = common.windowed(&cfg.group_by);

        let is_error = Predicate::new(&cfg.status_column, CompareOp::Ge, cfg.error_status_min);
        let mut reductions = vec![
            Reduction::count(REQUEST_COUNT),
            Reduction::new(ERROR_FRACTION, Input::Predicate(is_error), ReduceOp::Mean),
        ];
        let mut rate_specs = vec![
            RateSpec::per_second(REQUEST_COUNT, "requests_per_s"),
            RateSpec::percent(ERROR_FRACTION, "error_rate_pct"),
        ];
        let mut helpers = vec![ERROR_FRACTION];
        for (column, sum, rate) in [
            (&cfg.request_bytes_column, REQUEST_BYTES, "request_bytes_per_s"),
            (&cfg.response_bytes_column, RESPONSE_BYTES, "response_bytes_per_s"),
        ] {
            if let Some(column) = column {
                reductions.push(Reduction::of(sum, column.clone(), ReduceOp::Sum));
                rate_specs.push(RateSpec::per_second(sum, rate));
                helpers.push(sum);
            }
        }

        // All requests: superset population for counts and error rate. A null
        // status counts as a request but stays out of the error-rate mean.
        let all = Aggregator::new("requests", group_by.clone(), reductions)?
            .with_workers(common.workers)
            .run(records)?;
        let all = observed("requests", all, metrics);

        // Successful requests only: latency is meaningful once a response exists.
        let ok = Aggregator::new(
            "latency",
            group_by,
            vec![Reduction::of(LATENCY, cfg.latency_column.clone(), ReduceOp::Quantiles)],
        )?
        .with_population(vec![Predicate::new(
            &cfg.status_column,
            CompareOp::Lt,
            cfg.error_status_min,
        )])
        .with_quantiles(common.quantiles.clone())
        .with_workers(common.workers)
        .run(records)?;
        let ok = observed("latency", ok, metrics);

        let joined = common.join.join(&all, &ok)?;
        let extracted = QuantileExtractor::new(LATENCY, LATENCY_PREFIX, common.quantiles.clone())
            .with_scale(cfg.latency_scale)
            .apply(&joined)?;
        let series = common
            .rates
            .apply(&extracted, &rate_specs)?
            .drop_metrics(&helpers)?;

        let summary = common.summarize(&series, &cfg.group_by, &[REQUEST_COUNT], metrics)?;
        Ok(PipelineOutput { series, summary })
    }
}

/// Counter rates and gauge means, summed from instances into groups.
#[derive(Debug, Clone)]
pub struct ResourcePipeline {
    common: Common,
    cfg: ResourceConfig,
}

impl ResourcePipeline {
    fn run<R: ColumnLookup + Sync>(
        &self,
        records: &[R],
        metrics: &EngineMetrics,
    ) -> Result<PipelineOutput, EngineError> {
        let common = &self.common;
        let cfg = &self.cfg;

        let reductions = cfg
            .counters
            .iter()
            .flat_map(CounterSpec::reductions)
            .chain(
                cfg.gauges
                    .iter()
                    .map(|g| Reduction::of(g.output.clone(), g.column.clone(), ReduceOp::Mean)),
            )
            .collect();

        let instance = Aggregator::new("instance", common.windowed(&cfg.instance_by), reductions)?
            .with_workers(common.workers)
            .run(records)?;
        let mut per_instance = observed("instance", instance, metrics);
        for counter in &cfg.counters {
            per_instance = counter.reconstruct(&per_instance, &common.rates)?;
        }

        let mut keys = Vec::with_capacity(cfg.group_by.len() + 1);
        keys.push(WINDOW_COLUMN.to_string());
        keys.extend(cfg.group_by.iter().cloned());

        let mut sums: Vec<Reduction> = cfg
            .counters
            .iter()
            .map(|c| c.output.as_str())
            .chain(cfg.gauges.iter().map(|g| g.output.as_str()))
            .map(|name| Reduction::of(name, name, ReduceOp::Sum))
            .collect();
        sums.push(Reduction::count(INSTANCE_COUNT));

        let grouped = Aggregator::new("group", GroupBy::columns(keys), sums)?
            .with_workers(common.workers)
            .reaggregate(&per_instance)?;
        let series = observed("group", grouped, metrics);

        let summary = common.summarize(&series, &cfg.group_by, &[], metrics)?;
        Ok(PipelineOutput { series, summary })
    }
}

/// A configured pipeline, ready to run over records.
#[derive(Debug, Clone)]
pub enum Pipeline {
    Let(LetPipeline),
    Resource(ResourcePipeline),
}

impl Pipeline {
    /// Validates `cfg` and builds the pipeline it describes.
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let common = Common::from_config(cfg)?;
        Ok(match &cfg.pipeline {
            PipelineConfig::Let(let_cfg) => Self::Let(LetPipeline {
                common,
                cfg: let_cfg.clone(),
            }),
            PipelineConfig::Resource(res_cfg) => Self::Resource(ResourcePipeline {
                common,
                cfg: res_cfg.clone(),
            }),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Let(_) => "let",
            Self::Resource(_) => "resource",
        }
    }

    pub fn window(&self) -> WindowSize {
        self.common().rates.window()
    }

    fn common(&self) -> &Common {
        match self {
            Self::Let(p) => &p.common,
            Self::Resource(p) => &p.common,
        }
    }

    /// Runs the pipeline over a completed batch of records.
    pub fn run<R: ColumnLookup + Sync>(
        &self,
        records: &[R],
        metrics: &EngineMetrics,
    ) -> Result<PipelineOutput, EngineError> {
        let kept = self.common().filter(records, metrics);

        let output = match self {
            Self::Let(p) => p.run(&kept, metrics)?,
            Self::Resource(p) => p.run(&kept, metrics)?,
        };

        tracing::info!(
            pipeline = self.kind(),
            records = records.len(),
            rows = output.series.len(),
            summary_rows = output.summary.as_ref().map_or(0, Table::len),
            "pipeline complete",
        );
        Ok(output)
    }
}
