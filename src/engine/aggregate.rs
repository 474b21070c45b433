use super::sketch::{Quantile, QuantileSketch, QuantileSummary};

/// Tracks count, sum, min and max of a numeric input.
/// Used for every scalar reduction (count/sum/mean/min/max) and for the
/// min/max pair behind counter delta reconstruction.
#[derive(Debug, Clone)]
pub struct GaugeAggregate {
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
}

impl GaugeAggregate {
    /// Creates a new aggregate with min initialized to MAX and max to MIN.
    pub fn new() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    /// Records a value.
    pub fn record(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Returns a point-in-time snapshot of all statistics.
    pub fn snapshot(&self) -> GaugeSnapshot {
        if self.count == 0 {
            return GaugeSnapshot {
                sum: 0.0,
                count: 0,
                min: None,
                max: None,
            };
        }
        GaugeSnapshot {
            sum: self.sum,
            count: self.count,
            min: Some(self.min),
            max: Some(self.max),
        }
    }
}

impl Default for GaugeAggregate {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of gauge statistics. Min/max are absent when no
/// value was recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSnapshot {
    pub sum: f64,
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl GaugeSnapshot {
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Tracks a latency-like distribution with a bounded quantile sketch.
#[derive(Debug, Clone, Default)]
pub struct LatencyAggregate {
    sketch: QuantileSketch,
}

impl LatencyAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, value: f64) {
        self.sketch.add(value);
    }

    pub fn count(&self) -> u64 {
        self.sketch.count()
    }

    /// Extracts the requested quantiles; `None` when nothing was recorded.
    pub fn summarize(&self, quantiles: &[Quantile]) -> Option<QuantileSummary> {
        (!self.sketch.is_empty()).then(|| self.sketch.summarize(quantiles))
    }
}

/// Per-(group, reduction) running state.
#[derive(Debug, Clone)]
pub enum Accumulator {
    Gauge(GaugeAggregate),
    Latency(LatencyAggregate),
}

impl Accumulator {
    pub fn record(&mut self, value: f64) {
        match self {
            Self::Gauge(agg) => agg.record(value),
            Self::Latency(agg) => agg.record(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_aggregate_single_value() {
        let mut agg = GaugeAggregate::new();
        agg.record(42.0);

        let snap = agg.snapshot();
        assert_eq!(snap.sum, 42.0);
        assert_eq!(snap.count, 1);
        assert_eq!(snap.min, Some(42.0));
        assert_eq!(snap.max, Some(42.0));
        assert_eq!(snap.mean(), Some(42.0));
    }

    #[test]
    fn test_gauge_aggregate_multiple_values() {
        let mut agg = GaugeAggregate::new();
        agg.record(10.0);
        agg.record(50.0);
        agg.record(30.0);

        let snap = agg.snapshot();
        assert_eq!(snap.sum, 90.0);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.min, Some(10.0));
        assert_eq!(snap.max, Some(50.0));
        assert_eq!(snap.mean(), Some(30.0));
    }

    #[test]
    fn test_gauge_aggregate_negative_values() {
        let mut agg = GaugeAggregate::new();
        agg.record(-10.0);
        agg.record(20.0);
        agg.record(-30.0);

        let snap = agg.snapshot();
        assert_eq!(snap.sum, -20.0);
        assert_eq!(snap.min, Some(-30.0));
        assert_eq!(snap.max, Some(20.0));
    }

    #[test]
    fn test_gauge_aggregate_empty_snapshot() {
        let agg = GaugeAggregate::new();
        let snap = agg.snapshot();
        assert_eq!(snap.count, 0);
        assert_eq!(snap.min, None);
        assert_eq!(snap.max, None);
        assert_eq!(snap.mean(), None);
    }

    #[test]
    fn test_latency_aggregate_summarize() {
        let quantiles: Vec<Quantile> = ["p50", "p99"]
            .iter()
            .map(|l| l.parse().expect("valid"))
            .collect();

        let mut agg = LatencyAggregate::new();
        assert!(agg.summarize(&quantiles).is_none());

        agg.record(5.0);
        let summary = agg.summarize(&quantiles).expect("non-empty");
        assert_eq!(summary.get("p50"), Ok(5.0));
        assert_eq!(agg.count(), 1);
    }
}
