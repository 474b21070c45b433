//! Bounded-memory quantile sketch.
//!
//! Values are folded into logarithmically spaced buckets so that every
//! bucket's representative value is within a fixed relative error of the
//! values it holds. Memory is bounded by `max_bins` per sign, independent of
//! how many values are folded in.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::config::ConfigError;

/// Relative accuracy of bucket representatives (1%).
pub const DEFAULT_RELATIVE_ACCURACY: f64 = 0.01;

/// Maximum buckets kept per sign before the lowest ones are collapsed.
pub const DEFAULT_MAX_BINS: usize = 2048;

/// Magnitudes below this are counted in the zero bucket.
const MIN_INDEXABLE: f64 = 1e-9;

/// Errors from reading a finalized summary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuantileError {
    #[error("quantile {label} out of range: summary carries {available}")]
    OutOfRange { label: String, available: String },
}

/// A requested quantile such as `p50` (0.50) or `p999` (0.999).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct Quantile {
    label: Arc<str>,
    q: f64,
}

impl Quantile {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn fraction(&self) -> f64 {
        self.q
    }
}

impl FromStr for Quantile {
    type Err = ConfigError;

    /// Parses `p` followed by at least two digits, read as the decimal
    /// fraction `0.<digits>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidQuantile(s.to_string());
        let digits = s.strip_prefix('p').ok_or_else(invalid)?;
        if digits.len() < 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let q: f64 = format!("0.{digits}").parse().map_err(|_| invalid())?;
        Ok(Self {
            label: Arc::from(s),
            q,
        })
    }
}

impl TryFrom<String> for Quantile {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Buckets for one sign of the value range.
#[derive(Debug, Clone)]
struct Store {
    bins: BTreeMap<i32, u64>,
    max_bins: usize,
}

impl Store {
    fn new(max_bins: usize) -> Self {
        Self {
            bins: BTreeMap::new(),
            max_bins,
        }
    }

    fn add(&mut self, index: i32) {
        *self.bins.entry(index).or_insert(0) += 1;
        if self.bins.len() > self.max_bins {
            self.collapse_lowest();
        }
    }

    /// Folds the lowest bucket into its neighbour.
    fn collapse_lowest(&mut self) {
        if let Some((_, lowest_count)) = self.bins.pop_first() {
            if let Some(mut next) = self.bins.first_entry() {
                *next.get_mut() += lowest_count;
            }
        }
    }
}

/// Streaming quantile sketch with bounded memory.
#[derive(Debug, Clone)]
pub struct QuantileSketch {
    gamma: f64,
    ln_gamma: f64,
    positive: Store,
    negative: Store,
    zero_count: u64,
    count: u64,
    min: f64,
    max: f64,
}

impl QuantileSketch {
    /// Creates a sketch with the default accuracy and bucket bound.
    pub fn new() -> Self {
        Self::with_params(DEFAULT_RELATIVE_ACCURACY, DEFAULT_MAX_BINS)
    }

    /// `relative_accuracy` must be in (0, 1); `max_bins` must be positive.
    pub fn with_params(relative_accuracy: f64, max_bins: usize) -> Self {
        let alpha = relative_accuracy.clamp(1e-6, 0.5);
        let gamma = (1.0 + alpha) / (1.0 - alpha);
        let max_bins = max_bins.max(1);
        Self {
            gamma,
            ln_gamma: gamma.ln(),
            positive: Store::new(max_bins),
            negative: Store::new(max_bins),
            zero_count: 0,
            count: 0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    /// Folds in one value. Non-finite values are ignored.
    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }

        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        if value.abs() < MIN_INDEXABLE {
            self.zero_count += 1;
        } else if value > 0.0 {
            self.positive.add(self.index(value));
        } else {
            self.negative.add(self.index(-value));
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of buckets in use (both signs).
    pub fn bin_count(&self) -> usize {
        self.positive.bins.len() + self.negative.bins.len()
    }

    fn index(&self, magnitude: f64) -> i32 {
        (magnitude.ln() / self.ln_gamma).ceil() as i32
    }

    fn representative(&self, index: i32) -> f64 {
        2.0 * self.gamma.powi(index) / (self.gamma + 1.0)
    }

    /// Estimates the `q` quantile (0 ≤ q ≤ 1).
    ///
    /// Returns `None` for an empty sketch or an out-of-range `q`. The
    /// estimate always lies within the observed `[min, max]`, and is
    /// non-decreasing in `q`.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 || !(0.0..=1.0).contains(&q) {
            return None;
        }
        if q == 0.0 {
            return Some(self.min);
        }
        if q == 1.0 {
            return Some(self.max);
        }

        let rank = q * (self.count - 1) as f64;
        let mut seen = 0u64;

        // Most negative first: largest magnitude index of the negative store.
        for (&index, &n) in self.negative.bins.iter().rev() {
            seen += n;
            if seen as f64 > rank {
                return Some(self.clamp(-self.representative(index)));
            }
        }

        seen += self.zero_count;
        if seen as f64 > rank {
            return Some(self.clamp(0.0));
        }

        for (&index, &n) in &self.positive.bins {
            seen += n;
            if seen as f64 > rank {
                return Some(self.clamp(self.representative(index)));
            }
        }

        Some(self.max)
    }

    fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.min, self.max)
    }

    /// Extracts the requested quantiles, discarding the buckets.
    pub fn summarize(&self, quantiles: &[Quantile]) -> QuantileSummary {
        let values = quantiles
            .iter()
            .filter_map(|q| {
                self.quantile(q.fraction())
                    .map(|v| (Arc::clone(&q.label), v))
            })
            .collect();
        QuantileSummary {
            count: self.count,
            values,
        }
    }
}

impl Default for QuantileSketch {
    fn default() -> Self {
        Self::new()
    }
}

/// Finalized quantile values for one group, keyed by label.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantileSummary {
    count: u64,
    values: Vec<(Arc<str>, f64)>,
}

impl QuantileSummary {
    /// Number of values the summary was built from.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(label, v)| (label.as_ref(), *v))
    }

    /// Returns the value for `label`; absent labels are an error, never 0.
    pub fn get(&self, label: &str) -> Result<f64, QuantileError> {
        self.values
            .iter()
            .find(|(l, _)| l.as_ref() == label)
            .map(|(_, v)| *v)
            .ok_or_else(|| QuantileError::OutOfRange {
                label: label.to_string(),
                available: self.labels().join(","),
            })
    }

    fn labels(&self) -> Vec<&str> {
        self.values.iter().map(|(l, _)| l.as_ref()).collect()
    }
}

impl fmt::Display for QuantileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (label, v)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{label}: {v}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qs(labels: &[&str]) -> Vec<Quantile> {
        labels.iter().map(|l| l.parse().expect("valid")).collect()
    }

    #[test]
    fn test_quantile_label_parsing() {
        let p50: Quantile = "p50".parse().expect("p50");
        assert_eq!(p50.fraction(), 0.5);
        let p999: Quantile = "p999".parse().expect("p999");
        assert_eq!(p999.fraction(), 0.999);
        let p01: Quantile = "p01".parse().expect("p01");
        assert_eq!(p01.fraction(), 0.01);
        assert_eq!(p01.label(), "p01");
    }

    #[test]
    fn test_quantile_label_rejects_bad_input() {
        for bad in ["50", "p5", "p", "pxx", "q50", "p5a"] {
            assert_eq!(
                bad.parse::<Quantile>(),
                Err(ConfigError::InvalidQuantile(bad.to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_single_value_is_exact() {
        let mut s = QuantileSketch::new();
        s.add(5.0);
        assert_eq!(s.quantile(0.5), Some(5.0));
        assert_eq!(s.quantile(0.99), Some(5.0));
    }

    #[test]
    fn test_empty_sketch_has_no_quantiles() {
        let s = QuantileSketch::new();
        assert_eq!(s.quantile(0.5), None);
        assert!(s.summarize(&qs(&["p50"])).is_empty());
    }

    #[test]
    fn test_out_of_range_fraction() {
        let mut s = QuantileSketch::new();
        s.add(1.0);
        assert_eq!(s.quantile(1.5), None);
        assert_eq!(s.quantile(-0.1), None);
    }

    #[test]
    fn test_relative_accuracy_on_uniform_data() {
        let mut s = QuantileSketch::new();
        for i in 1..=10_000 {
            s.add(f64::from(i));
        }
        for (q, expected) in [(0.5, 5_000.0), (0.9, 9_000.0), (0.99, 9_900.0)] {
            let got = s.quantile(q).expect("non-empty");
            let rel = (got - expected).abs() / expected;
            assert!(rel < 0.02, "q={q} got={got} expected={expected}");
        }
    }

    #[test]
    fn test_monotone_and_bounded() {
        let mut s = QuantileSketch::new();
        let values = [3.0, 0.0, -12.5, 400.0, 7.25, 7.25, 1e6, -0.5, 12.0];
        for v in values {
            s.add(v);
        }
        let mut prev = f64::MIN;
        for i in 0..=100 {
            let v = s.quantile(f64::from(i) / 100.0).expect("non-empty");
            assert!(v >= prev, "not monotone at {i}: {v} < {prev}");
            assert!((-12.5..=1e6).contains(&v), "out of bounds: {v}");
            prev = v;
        }
    }

    #[test]
    fn test_memory_is_bounded() {
        let mut s = QuantileSketch::with_params(0.01, 64);
        for i in 1..=100_000 {
            s.add(f64::from(i) * 1.37);
        }
        assert!(s.bin_count() <= 64);
        assert_eq!(s.count(), 100_000);
        let p99 = s.quantile(0.99).expect("non-empty");
        let expected = 99_000.0 * 1.37;
        assert!((p99 - expected).abs() / expected < 0.02);
    }

    #[test]
    fn test_non_finite_ignored() {
        let mut s = QuantileSketch::new();
        s.add(f64::NAN);
        s.add(f64::INFINITY);
        assert!(s.is_empty());
    }

    #[test]
    fn test_summary_get() {
        let mut s = QuantileSketch::new();
        for v in [1.0, 2.0, 3.0] {
            s.add(v);
        }
        let summary = s.summarize(&qs(&["p50", "p99"]));
        assert_eq!(summary.count(), 3);
        assert_eq!(summary.len(), 2);
        let p50 = summary.get("p50").expect("p50");
        assert!((p50 - 2.0).abs() <= 0.02);
        assert!(matches!(
            summary.get("p90"),
            Err(QuantileError::OutOfRange { .. })
        ));
    }
}
