use crate::record::Value;

use super::table::{Field, FieldType, SchemaError, Table};
use super::window::WindowSize;

/// Converts window-scoped totals into per-second rates and percentages.
///
/// The window size is non-zero by construction, so per-second division is
/// always defined. A null input (an empty population) stays null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateFormatter {
    window: WindowSize,
}

impl RateFormatter {
    pub fn new(window: WindowSize) -> Self {
        Self { window }
    }

    pub fn window(&self) -> WindowSize {
        self.window
    }

    /// `total / window_seconds`.
    pub fn per_second(&self, total: f64) -> f64 {
        total / self.window.as_f64()
    }

    /// Mean of a 0/1 indicator as a percentage.
    pub fn percent(&self, fraction: f64) -> f64 {
        fraction * 100.0
    }

    /// Appends one derived column per spec. Null inputs produce null.
    pub fn apply(&self, table: &Table, specs: &[RateSpec]) -> Result<Table, SchemaError> {
        let mut out = table.clone();
        for spec in specs {
            if !out.schema().contains(&spec.input) {
                return Err(SchemaError::UnknownColumn(spec.input.clone()));
            }
            out = out.with_metric::<SchemaError, _>(
                Field::metric(spec.output.clone(), FieldType::Float),
                |row| Ok(Value::from_opt_f64(row.f64(&spec.input).map(|v| self.format(spec.kind, v)))),
            )?;
        }
        Ok(out)
    }

    fn format(&self, kind: RateKind, v: f64) -> f64 {
        match kind {
            RateKind::PerSecond => self.per_second(v),
            RateKind::Percent => self.percent(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateKind {
    PerSecond,
    Percent,
}

/// One derived rate column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateSpec {
    pub input: String,
    pub output: String,
    pub kind: RateKind,
}

impl RateSpec {
    pub fn per_second(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            kind: RateKind::PerSecond,
        }
    }

    pub fn percent(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            kind: RateKind::Percent,
        }
    }
}
