//! Key-equality join of two aggregate tables.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::config::ConfigError;
use crate::record::Value;

use super::dimension::missing_from;
use super::table::{Field, Role, Row, Schema, SchemaError, Table};

/// Suffix appended to a right-side metric whose name is already taken.
pub const COLLISION_SUFFIX: &str = "_right";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JoinError {
    #[error("right key columns are not keys of the left table: {missing:?}")]
    KeyNotShared { missing: Vec<String> },

    #[error("inner join requires equal key sets: left {left:?}, right {right:?}")]
    KeySetsDiffer {
        left: Vec<String>,
        right: Vec<String>,
    },

    #[error("right table has more than one row for key {key}")]
    DuplicateRightKey { key: String },

    #[error("column {column} collides with an existing column even after suffixing")]
    Collision { column: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Which left rows survive a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    /// Only keys present on both sides.
    Inner,
    /// Every left row; unmatched right fields are null.
    #[default]
    Left,
}

impl JoinKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inner => "inner",
            Self::Left => "left",
        }
    }
}

impl FromStr for JoinKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inner" => Ok(Self::Inner),
            "left" => Ok(Self::Left),
            other => Err(ConfigError::UnsupportedJoinKind(other.to_string())),
        }
    }
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Joins a left table to a right table on the right table's key columns.
///
/// The right keys must all be keys of the left table, so each left row
/// matches at most one right row. Output keeps the left schema followed by
/// the right metrics, in left row order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinSpec {
    kind: JoinKind,
}

impl JoinSpec {
    pub fn new(kind: JoinKind) -> Self {
        Self { kind }
    }

    pub fn join(&self, left: &Table, right: &Table) -> Result<Table, JoinError> {
        let left_keys = left.schema().key_names();
        let right_keys = right.schema().key_names();

        let right_owned: Vec<String> = right_keys.iter().map(|k| k.to_string()).collect();
        let missing = missing_from(&right_owned, &left_keys);
        if !missing.is_empty() {
            return Err(JoinError::KeyNotShared {
                missing: missing.into_iter().map(String::from).collect(),
            });
        }
        if self.kind == JoinKind::Inner && left_keys.len() != right_keys.len() {
            return Err(JoinError::KeySetsDiffer {
                left: left_keys.iter().map(|k| k.to_string()).collect(),
                right: right_owned,
            });
        }

        let (fields, right_metric_idx) = self.output_fields(left.schema(), right.schema())?;
        let schema = Schema::new(fields)?;

        let right_key_idx: Vec<usize> = right_keys
            .iter()
            .filter_map(|k| right.schema().position(k))
            .collect();
        let left_key_idx: Vec<usize> = right_keys
            .iter()
            .filter_map(|k| left.schema().position(k))
            .collect();

        let mut index: HashMap<Vec<&Value>, &Row> = HashMap::with_capacity(right.len());
        for row in right.rows() {
            let key: Vec<&Value> = right_key_idx.iter().map(|&i| &row.0[i]).collect();
            if index.contains_key(&key) {
                return Err(JoinError::DuplicateRightKey {
                    key: describe(&key),
                });
            }
            index.insert(key, row);
        }

        let mut rows = Vec::with_capacity(left.len());
        for row in left.rows() {
            let key: Vec<&Value> = left_key_idx.iter().map(|&i| &row.0[i]).collect();
            let matched = index.get(&key);
            if matched.is_none() && self.kind == JoinKind::Inner {
                continue;
            }

            let mut values = row.0.clone();
            match matched {
                Some(r) => values.extend(right_metric_idx.iter().map(|&i| r.0[i].clone())),
                None => values.extend(right_metric_idx.iter().map(|_| Value::Null)),
            }
            rows.push(Row(values));
        }

        tracing::debug!(
            kind = %self.kind,
            left_rows = left.len(),
            right_rows = right.len(),
            joined_rows = rows.len(),
            "joined tables",
        );

        Ok(Table::new(schema, rows)?)
    }

    /// Left fields, then right metrics renamed on collision. Returns the
    /// right metric positions alongside.
    fn output_fields(
        &self,
        left: &Schema,
        right: &Schema,
    ) -> Result<(Vec<Field>, Vec<usize>), JoinError> {
        let mut fields: Vec<Field> = left.fields().to_vec();
        let mut right_idx = Vec::new();

        for (i, field) in right.fields().iter().enumerate() {
            if field.role == Role::Key {
                continue;
            }
            let taken = |name: &str| fields.iter().any(|f| f.name == name);
            let name = if !taken(&field.name) {
                field.name.clone()
            } else {
                let suffixed = format!("{}{COLLISION_SUFFIX}", field.name);
                if taken(&suffixed) || right.contains(&suffixed) {
                    return Err(JoinError::Collision { column: suffixed });
                }
                suffixed
            };
            fields.push(Field::metric(name, field.ty));
            right_idx.push(i);
        }

        Ok((fields, right_idx))
    }
}

fn describe(key: &[&Value]) -> String {
    let parts: Vec<String> = key.iter().map(|v| v.to_string()).collect();
    format!("({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::table::FieldType;

    fn table(keys: &[&str], metric: &str, rows: Vec<(Vec<&str>, f64)>) -> Table {
        let mut fields: Vec<Field> = keys.iter().map(|k| Field::key(*k, FieldType::Str)).collect();
        fields.push(Field::metric(metric, FieldType::Float));
        let schema = Schema::new(fields).expect("schema");
        let rows = rows
            .into_iter()
            .map(|(key, v)| {
                let mut values: Vec<Value> = key.into_iter().map(Value::from).collect();
                values.push(Value::Float(v));
                Row(values)
            })
            .collect();
        Table::new(schema, rows).expect("table")
    }

    fn abc() -> Table {
        table(
            &["pod"],
            "count",
            vec![(vec!["A"], 1.0), (vec!["B"], 2.0), (vec!["C"], 3.0)],
        )
    }

    fn ab() -> Table {
        table(&["pod"], "latency", vec![(vec!["A"], 10.0), (vec!["B"], 20.0)])
    }

    #[test]
    fn test_left_join_preserves_left_rows() {
        let out = JoinSpec::new(JoinKind::Left).join(&abc(), &ab()).expect("join");
        assert_eq!(out.len(), 3);
        let c = out.find(&[("pod", Value::from("C"))]).expect("C");
        assert_eq!(c.get("latency"), Some(&Value::Null));
        assert_eq!(c.get("count"), Some(&Value::Float(3.0)));
        let a = out.find(&[("pod", Value::from("A"))]).expect("A");
        assert_eq!(a.get("latency"), Some(&Value::Float(10.0)));
    }

    #[test]
    fn test_inner_join_keeps_matches_only() {
        let out = JoinSpec::new(JoinKind::Inner).join(&abc(), &ab()).expect("join");
        assert_eq!(out.len(), 2);
        assert!(out.find(&[("pod", Value::from("C"))]).is_none());
    }

    #[test]
    fn test_collision_gets_suffix() {
        let right = table(&["pod"], "count", vec![(vec!["A"], 9.0)]);
        let out = JoinSpec::new(JoinKind::Left).join(&abc(), &right).expect("join");
        let a = out.find(&[("pod", Value::from("A"))]).expect("A");
        assert_eq!(a.get("count"), Some(&Value::Float(1.0)));
        assert_eq!(a.get("count_right"), Some(&Value::Float(9.0)));
    }

    #[test]
    fn test_unresolvable_collision() {
        let left = abc()
            .with_metric::<SchemaError, _>(Field::metric("count_right", FieldType::Float), |_| {
                Ok(Value::Null)
            })
            .expect("derive");
        let right = table(&["pod"], "count", vec![(vec!["A"], 9.0)]);
        assert_eq!(
            JoinSpec::new(JoinKind::Left).join(&left, &right),
            Err(JoinError::Collision {
                column: "count_right".to_string()
            })
        );
    }

    #[test]
    fn test_key_superset_rules() {
        let wide = table(
            &["pod", "peer"],
            "bytes",
            vec![(vec!["A", "x"], 1.0), (vec!["A", "y"], 2.0)],
        );

        // Right keys must be a subset of left keys.
        let err = JoinSpec::new(JoinKind::Left).join(&abc(), &wide).unwrap_err();
        assert_eq!(
            err,
            JoinError::KeyNotShared {
                missing: vec!["peer".to_string()]
            }
        );

        // Left join onto a narrower right side fans the right row out.
        let out = JoinSpec::new(JoinKind::Left).join(&wide, &ab()).expect("join");
        assert_eq!(out.len(), 2);
        for view in out.views() {
            assert_eq!(view.get("latency"), Some(&Value::Float(10.0)));
        }

        // Inner joins need identical key sets.
        assert!(matches!(
            JoinSpec::new(JoinKind::Inner).join(&wide, &ab()),
            Err(JoinError::KeySetsDiffer { .. })
        ));
    }

    #[test]
    fn test_join_kind_parsing() {
        assert_eq!("left".parse::<JoinKind>(), Ok(JoinKind::Left));
        assert_eq!("inner".parse::<JoinKind>(), Ok(JoinKind::Inner));
        assert_eq!(
            "outer".parse::<JoinKind>(),
            Err(ConfigError::UnsupportedJoinKind("outer".to_string()))
        );
        assert_eq!(JoinKind::default(), JoinKind::Left);
    }
}
