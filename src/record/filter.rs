use std::cmp::Ordering;

use serde::Deserialize;

use super::parse::{require, DataError};
use super::{ColumnLookup, Value};

/// Comparison operator of a filter predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    const fn is_ordering(self) -> bool {
        !matches!(self, Self::Eq | Self::Ne)
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            Self::Lt => ord == Ordering::Less,
            Self::Le => ord != Ordering::Greater,
            Self::Gt => ord == Ordering::Greater,
            Self::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Deserialize)]
struct RawPredicate {
    column: String,
    op: CompareOp,
    value: serde_json::Value,
}

/// `column <op> value`, evaluated against a single record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawPredicate")]
pub struct Predicate {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl From<RawPredicate> for Predicate {
    fn from(raw: RawPredicate) -> Self {
        Self {
            column: raw.column,
            op: raw.op,
            value: Value::from(raw.value),
        }
    }
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluates the predicate.
    ///
    /// A missing column is a data error. Ordering against a numeric literal
    /// requires a numeric column; a null column value never satisfies an
    /// ordering comparison.
    pub fn eval<R: ColumnLookup + ?Sized>(&self, record: &R) -> Result<bool, DataError> {
        let actual = require(record, &self.column)?;

        if let (Some(a), Some(b)) = (actual.as_f64(), self.value.as_f64()) {
            return Ok(a.partial_cmp(&b).is_some_and(|ord| self.op.holds(ord)));
        }

        if self.op.is_ordering() {
            if actual.is_null() {
                return Ok(false);
            }
            if self.value.as_f64().is_some() {
                return Err(DataError::NonNumeric {
                    column: self.column.clone(),
                    found: actual.type_name(),
                });
            }
            return match (actual, &self.value) {
                (Value::Str(a), Value::Str(b)) => Ok(self.op.holds(a.as_ref().cmp(b.as_ref()))),
                _ => Ok(false),
            };
        }

        let equal = actual == &self.value;
        Ok(match self.op {
            CompareOp::Eq => equal,
            _ => !equal,
        })
    }

    /// Numeric view of the predicate for reductions: 1.0 when it holds.
    ///
    /// A null column value yields `None`, so the record drops out of a
    /// mean over the indicator instead of counting as a miss.
    pub fn indicator<R: ColumnLookup + ?Sized>(
        &self,
        record: &R,
    ) -> Result<Option<f64>, DataError> {
        if require(record, &self.column)?.is_null() {
            return Ok(None);
        }
        Ok(Some(if self.eval(record)? { 1.0 } else { 0.0 }))
    }
}

/// Conjunction of predicates. An empty list accepts everything.
pub fn matches_all<R: ColumnLookup + ?Sized>(
    predicates: &[Predicate],
    record: &R,
) -> Result<bool, DataError> {
    for predicate in predicates {
        if !predicate.eval(record)? {
            return Ok(false);
        }
    }
    Ok(true)
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.column, self.op.as_str(), self.value)
    }
}
