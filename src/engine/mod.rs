pub mod aggregate;
pub mod aggregator;
pub mod counter;
pub mod dimension;
pub mod join;
pub mod pipeline;
pub mod quantile;
pub mod rate;
pub mod sketch;
pub mod summary;
pub mod table;
pub mod window;

use thiserror::Error;

/// Errors that abort a pipeline run after configuration succeeded.
///
/// Per-record data problems never surface here; they are skipped and
/// counted inside each stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("aggregation: {0}")]
    Aggregate(#[from] aggregator::AggregateError),

    #[error("join: {0}")]
    Join(#[from] join::JoinError),

    #[error("schema: {0}")]
    Schema(#[from] table::SchemaError),

    #[error("quantile extraction: {0}")]
    Quantile(#[from] sketch::QuantileError),
}
