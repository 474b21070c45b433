use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::engine::counter::CounterSpec;
use crate::engine::join::JoinKind;
use crate::engine::pipeline::GaugeSpec;
use crate::engine::sketch::Quantile;
use crate::engine::window::{TimeUnit, WindowSize, WINDOW_COLUMN};
use crate::record::filter::Predicate;

/// Substring reserved for columns the pipelines create and drop internally.
pub const INTERNAL_MARKER: &str = "__";

/// Configuration problems. Always fatal, and always detected before the
/// first record is read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("window_seconds must be positive")]
    ZeroWindow,

    #[error("{field} must name at least one column")]
    EmptyGroupKey { field: &'static str },

    #[error("{field} lists column {column} more than once")]
    DuplicateKey { field: &'static str, column: String },

    #[error("unsupported join kind: {0} (expected inner or left)")]
    UnsupportedJoinKind(String),

    #[error("invalid quantile label: {0} (expected p followed by at least two digits)")]
    InvalidQuantile(String),

    #[error("quantiles_requested must not be empty")]
    NoQuantiles,

    #[error("quantile {0} is requested more than once")]
    DuplicateQuantile(String),

    #[error("pipeline.group_by must be a subset of pipeline.instance_by; not present: {missing:?}")]
    NotNarrowing { missing: Vec<String> },

    #[error("workers must be positive")]
    InvalidWorkers,

    #[error("resource pipeline needs at least one counter or gauge")]
    NoMetrics,

    #[error("column {0} is produced more than once")]
    DuplicateOutput(String),

    #[error("{field} must be finite and non-zero, got {value}")]
    InvalidScale { field: String, value: f64 },

    #[error("column name {0} is reserved (window key or contains \"__\")")]
    ReservedColumn(String),
}

/// Top-level configuration for one aggregation run.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Window size in seconds. Default: 10.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Join between the all-requests and latency branches (inner, left).
    /// Default: "left".
    #[serde(default = "default_join_kind")]
    pub join_kind: String,

    /// Quantile labels to extract. Default: p50, p90, p99.
    #[serde(default = "default_quantiles")]
    pub quantiles_requested: Vec<String>,

    /// Predicates every record must satisfy; applied before windowing.
    #[serde(default)]
    pub filter_predicates: Vec<Predicate>,

    /// Timestamp column. Default: "time_".
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,

    /// Unit of the timestamp column. Default: ns.
    #[serde(default)]
    pub timestamp_unit: TimeUnit,

    /// Worker threads per aggregation stage. Default: 4.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Also produce the per-entity summary table. Default: false.
    #[serde(default)]
    pub summarize: bool,

    /// What to compute.
    pub pipeline: PipelineConfig,
}

/// Pipeline selection, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineConfig {
    /// Latency, error rate and throughput of request records.
    Let(LetConfig),
    /// Counter rates and gauge means of per-process samples.
    Resource(ResourceConfig),
}

/// Request-health pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LetConfig {
    /// Grouping columns, e.g. [pod] or [pod, remote_addr].
    pub group_by: Vec<String>,

    /// Latency column. Default: "latency".
    #[serde(default = "default_latency_column")]
    pub latency_column: String,

    /// Multiplier applied to extracted quantiles. Default: 1e-6 (ns to ms).
    #[serde(default = "default_latency_scale")]
    pub latency_scale: f64,

    /// Response status column. Default: "resp_status".
    #[serde(default = "default_status_column")]
    pub status_column: String,

    /// Statuses at or above this count as errors. Default: 400.
    #[serde(default = "default_error_status_min")]
    pub error_status_min: i64,

    /// Request body size column, if byte rates are wanted.
    #[serde(default)]
    pub request_bytes_column: Option<String>,

    /// Response body size column, if byte rates are wanted.
    #[serde(default)]
    pub response_bytes_column: Option<String>,
}

/// Resource-usage pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    /// Keys of a single sampled instance, e.g. [upid, pod].
    pub instance_by: Vec<String>,

    /// Coarser grouping the instances are summed into, e.g. [pod].
    pub group_by: Vec<String>,

    /// Monotonic counters turned into per-second rates.
    #[serde(default)]
    pub counters: Vec<CounterSpec>,

    /// Point-in-time gauges averaged per instance.
    #[serde(default)]
    pub gauges: Vec<GaugeSpec>,
}

// --- Default value functions ---

fn default_window_seconds() -> u64 {
    10
}

fn default_join_kind() -> String {
    JoinKind::default().as_str().to_string()
}

fn default_quantiles() -> Vec<String> {
    vec!["p50".to_string(), "p90".to_string(), "p99".to_string()]
}

fn default_timestamp_column() -> String {
    "time_".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_latency_column() -> String {
    "latency".to_string()
}

fn default_latency_scale() -> f64 {
    1e-6
}

fn default_status_column() -> String {
    "resp_status".to_string()
}

fn default_error_status_min() -> i64 {
    400
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg = Self::parse(&data)
            .with_context(|| format!("loading config file {}", path.display()))?;

        Ok(cfg)
    }

    /// Parse and validate configuration from YAML text.
    pub fn parse(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data).context("parsing config")?;
        cfg.validate().context("validating config")?;
        Ok(cfg)
    }

    /// Validate every option eagerly.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window_size()?;
        self.resolved_join_kind()?;
        self.resolved_quantiles()?;

        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkers);
        }

        match &self.pipeline {
            PipelineConfig::Let(let_cfg) => let_cfg.validate(),
            PipelineConfig::Resource(res_cfg) => res_cfg.validate(),
        }
    }

    pub fn window_size(&self) -> Result<WindowSize, ConfigError> {
        WindowSize::new(self.window_seconds)
    }

    pub fn resolved_join_kind(&self) -> Result<JoinKind, ConfigError> {
        self.join_kind.parse()
    }

    pub fn resolved_quantiles(&self) -> Result<Vec<Quantile>, ConfigError> {
        if self.quantiles_requested.is_empty() {
            return Err(ConfigError::NoQuantiles);
        }
        let quantiles: Vec<Quantile> = self
            .quantiles_requested
            .iter()
            .map(|q| q.parse())
            .collect::<Result<_, _>>()?;
        for (i, q) in quantiles.iter().enumerate() {
            if quantiles[..i].iter().any(|prev| prev.label() == q.label()) {
                return Err(ConfigError::DuplicateQuantile(q.label().to_string()));
            }
        }
        Ok(quantiles)
    }
}

impl LetConfig {
    /// Output columns the pipeline itself defines.
    pub const OUTPUTS: [&'static str; 5] = [
        "request_count",
        "requests_per_s",
        "error_rate_pct",
        "request_bytes_per_s",
        "response_bytes_per_s",
    ];

    fn validate(&self) -> Result<(), ConfigError> {
        check_group_key("pipeline.group_by", &self.group_by)?;
        check_scale("pipeline.latency_scale", self.latency_scale)?;
        for column in &self.group_by {
            if Self::OUTPUTS.contains(&column.as_str()) || column.starts_with("latency_") {
                return Err(ConfigError::DuplicateOutput(column.clone()));
            }
        }
        Ok(())
    }
}

impl ResourceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_group_key("pipeline.instance_by", &self.instance_by)?;
        check_group_key("pipeline.group_by", &self.group_by)?;

        let missing: Vec<String> = self
            .group_by
            .iter()
            .filter(|c| !self.instance_by.contains(c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::NotNarrowing { missing });
        }

        if self.counters.is_empty() && self.gauges.is_empty() {
            return Err(ConfigError::NoMetrics);
        }

        let mut outputs: Vec<&str> = self.instance_by.iter().map(String::as_str).collect();
        outputs.push("instance_count");
        let produced = self
            .counters
            .iter()
            .map(|c| c.output.as_str())
            .chain(self.gauges.iter().map(|g| g.output.as_str()));
        for output in produced {
            if outputs.contains(&output) {
                return Err(ConfigError::DuplicateOutput(output.to_string()));
            }
            outputs.push(output);
        }

        for output in &outputs[self.instance_by.len()..] {
            check_reserved(output)?;
        }
        for counter in &self.counters {
            check_scale(&format!("counter {} scale", counter.output), counter.scale)?;
        }
        Ok(())
    }
}

fn check_group_key(field: &'static str, columns: &[String]) -> Result<(), ConfigError> {
    if columns.is_empty() {
        return Err(ConfigError::EmptyGroupKey { field });
    }
    for (i, column) in columns.iter().enumerate() {
        check_reserved(column)?;
        if columns[..i].contains(column) {
            return Err(ConfigError::DuplicateKey {
                field,
                column: column.clone(),
            });
        }
    }
    Ok(())
}

/// `window_start` is the window key; `__` marks internal helper columns.
fn check_reserved(column: &str) -> Result<(), ConfigError> {
    if column == WINDOW_COLUMN || column.contains(INTERNAL_MARKER) {
        return Err(ConfigError::ReservedColumn(column.to_string()));
    }
    Ok(())
}

fn check_scale(field: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value == 0.0 {
        return Err(ConfigError::InvalidScale {
            field: field.to_string(),
            value,
        });
    }
    Ok(())
}
