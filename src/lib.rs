//! Windowed LET (latency, error rate, throughput) and resource-usage
//! aggregation over batches of telemetry records.

pub mod config;
pub mod engine;
pub mod export;
pub mod record;
