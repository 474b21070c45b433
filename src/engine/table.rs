//! Fixed-schema result tables passed between stages.
//!
//! Every stage declares its output schema up front: named, typed fields,
//! each marked as a grouping key or a metric. Rows are positional against
//! that schema, so a downstream stage can validate what it consumes.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::record::{ColumnLookup, Value};

use super::window::WINDOW_COLUMN;

/// Schema contract violations between stages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("row {row} has {found} values, schema has {expected} fields")]
    Arity {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("column {column}: expected {expected:?}, found {found}")]
    TypeMismatch {
        column: String,
        expected: FieldType,
        found: &'static str,
    },

    #[error("column {0} is a key column and cannot be dropped")]
    KeyColumn(String),
}

/// Declared type of a field. Nulls are allowed in every type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    Str,
    Summary,
    /// Key columns whose source values are heterogeneous.
    Dynamic,
}

impl FieldType {
    /// Type of a single non-null value.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Bool),
            Value::Int(_) => Some(Self::Int),
            Value::Float(_) => Some(Self::Float),
            Value::Str(_) => Some(Self::Str),
            Value::Summary(_) => Some(Self::Summary),
        }
    }

    /// Narrowest type covering all values; all-null columns are `Dynamic`.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        let mut found: Option<Self> = None;
        for ty in values.into_iter().filter_map(Self::of) {
            match found {
                None => found = Some(ty),
                Some(prev) if prev == ty => {}
                Some(_) => return Self::Dynamic,
            }
        }
        found.unwrap_or(Self::Dynamic)
    }

    fn accepts(self, value: &Value) -> bool {
        match (self, Self::of(value)) {
            (_, None) | (Self::Dynamic, _) => true,
            (expected, Some(found)) => expected == found,
        }
    }
}

/// Whether a field identifies a group or carries a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Key,
    Metric,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub role: Role,
}

impl Field {
    pub fn key(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            role: Role::Key,
        }
    }

    pub fn metric(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            role: Role::Metric,
        }
    }
}

/// Ordered, name-indexed list of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    fields: Vec<Field>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self, SchemaError> {
        let mut index = HashMap::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            if index.insert(field.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateColumn(field.name.clone()));
            }
        }
        Ok(Self { fields, index })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.position(name).and_then(|i| self.fields.get(i))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn key_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.role == Role::Key)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn metric_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.role == Role::Metric)
            .map(|f| f.name.as_str())
            .collect()
    }
}

/// Positional values for one schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

/// Borrowed named view of one row.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    schema: &'a Schema,
    row: &'a Row,
}

impl<'a> RowView<'a> {
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.schema.position(name).and_then(|i| self.row.0.get(i))
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }
}

impl ColumnLookup for RowView<'_> {
    fn column(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

/// A stage's output: one schema, many rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    schema: Arc<Schema>,
    rows: Vec<Row>,
}

impl Table {
    /// Builds a table, checking every row against the schema.
    pub fn new(schema: Schema, rows: Vec<Row>) -> Result<Self, SchemaError> {
        for (i, row) in rows.iter().enumerate() {
            if row.0.len() != schema.len() {
                return Err(SchemaError::Arity {
                    row: i,
                    expected: schema.len(),
                    found: row.0.len(),
                });
            }
            for (field, value) in schema.fields.iter().zip(row.0.iter()) {
                if !field.ty.accepts(value) {
                    return Err(SchemaError::TypeMismatch {
                        column: field.name.clone(),
                        expected: field.ty,
                        found: value.type_name(),
                    });
                }
            }
        }
        Ok(Self {
            schema: Arc::new(schema),
            rows,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn views(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(move |row| RowView {
            schema: &self.schema,
            row,
        })
    }

    /// First row whose columns equal all of `pairs`.
    pub fn find(&self, pairs: &[(&str, Value)]) -> Option<RowView<'_>> {
        self.views()
            .find(|view| pairs.iter().all(|(col, v)| view.get(col) == Some(v)))
    }

    /// Values of one column, in row order.
    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>, SchemaError> {
        let idx = self
            .schema
            .position(name)
            .ok_or_else(|| SchemaError::UnknownColumn(name.to_string()))?;
        Ok(self.rows.iter().filter_map(|r| r.0.get(idx)).collect())
    }

    /// Appends a derived metric column computed from each row.
    pub fn with_metric<E, F>(&self, field: Field, mut derive: F) -> Result<Self, E>
    where
        E: From<SchemaError>,
        F: FnMut(&RowView<'_>) -> Result<Value, E>,
    {
        let mut fields = self.schema.fields.clone();
        fields.push(field);
        let schema = Schema::new(fields)?;

        let mut rows = Vec::with_capacity(self.rows.len());
        for view in self.views() {
            let mut values = view.row.0.clone();
            values.push(derive(&view)?);
            rows.push(Row(values));
        }

        Ok(Self::new(schema, rows)?)
    }

    /// Removes metric columns. Unknown names and key columns are errors.
    pub fn drop_metrics(&self, names: &[&str]) -> Result<Self, SchemaError> {
        for name in names {
            match self.schema.field(name) {
                None => return Err(SchemaError::UnknownColumn(name.to_string())),
                Some(f) if f.role == Role::Key => {
                    return Err(SchemaError::KeyColumn(name.to_string()))
                }
                Some(_) => {}
            }
        }

        let keep: Vec<usize> = (0..self.schema.len())
            .filter(|&i| !names.contains(&self.schema.fields[i].name.as_str()))
            .collect();
        let fields = keep
            .iter()
            .map(|&i| self.schema.fields[i].clone())
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| Row(keep.iter().map(|&i| row.0[i].clone()).collect()))
            .collect();

        Ok(Self {
            schema: Arc::new(Schema::new(fields)?),
            rows,
        })
    }

    /// Sorts rows by window start, then by the remaining key columns in
    /// schema order.
    pub fn sort_by_keys(&mut self) {
        let mut order: Vec<usize> = Vec::new();
        if let Some(w) = self.schema.position(WINDOW_COLUMN) {
            order.push(w);
        }
        for (i, field) in self.schema.fields.iter().enumerate() {
            if field.role == Role::Key && field.name != WINDOW_COLUMN {
                order.push(i);
            }
        }

        self.rows.sort_by(|a, b| {
            order
                .iter()
                .map(|&i| a.0[i].total_cmp(&b.0[i]))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}
