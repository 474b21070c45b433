use crate::record::Value;

use super::sketch::Quantile;
use super::table::{Field, FieldType, SchemaError, Table};
use super::EngineError;

/// Expands a summary column into one scalar column per requested label.
///
/// Output columns are named `<prefix>_<label>` and scaled by `scale`. A null
/// summary (empty population) yields null for every label; a summary that
/// lacks a requested label is an error.
#[derive(Debug, Clone)]
pub struct QuantileExtractor {
    column: String,
    prefix: String,
    quantiles: Vec<Quantile>,
    scale: f64,
}

impl QuantileExtractor {
    pub fn new(column: impl Into<String>, prefix: impl Into<String>, quantiles: Vec<Quantile>) -> Self {
        Self {
            column: column.into(),
            prefix: prefix.into(),
            quantiles,
            scale: 1.0,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn output_name(&self, quantile: &Quantile) -> String {
        format!("{}_{}", self.prefix, quantile.label())
    }

    /// Adds the scalar columns and drops the summary column.
    pub fn apply(&self, table: &Table) -> Result<Table, EngineError> {
        match table.schema().field(&self.column) {
            Some(f) if f.ty == FieldType::Summary => {}
            Some(f) => {
                return Err(SchemaError::TypeMismatch {
                    column: self.column.clone(),
                    expected: FieldType::Summary,
                    found: type_label(f.ty),
                }
                .into())
            }
            None => return Err(SchemaError::UnknownColumn(self.column.clone()).into()),
        }

        let mut out = table.clone();
        for quantile in &self.quantiles {
            out = out.with_metric::<EngineError, _>(
                Field::metric(self.output_name(quantile), FieldType::Float),
                |row| {
                    let Some(summary) = row.get(&self.column).and_then(Value::as_summary) else {
                        return Ok(Value::Null);
                    };
                    Ok(Value::Float(summary.get(quantile.label())? * self.scale))
                },
            )?;
        }

        Ok(out.drop_metrics(&[self.column.as_str()])?)
    }
}

fn type_label(ty: FieldType) -> &'static str {
    match ty {
        FieldType::Bool => "bool",
        FieldType::Int => "int",
        FieldType::Float => "float",
        FieldType::Str => "string",
        FieldType::Summary => "summary",
        FieldType::Dynamic => "dynamic",
    }
}
