use std::io::Write;

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::engine::table::{RowView, Table};
use crate::engine::window::WINDOW_COLUMN;
use crate::record::Value;

/// Companion column carrying the window start as an RFC 3339 string.
pub const WINDOW_TIME_COLUMN: &str = "window_start_time";

/// One row serialized as a JSON object with columns in schema order.
struct JsonRow<'a> {
    table: &'a Table,
    view: RowView<'a>,
}

impl Serialize for JsonRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.table.schema().fields();
        let mut map = serializer.serialize_map(None)?;
        for field in fields {
            let value = self.view.get(&field.name).unwrap_or(&Value::Null);
            map.serialize_entry(&field.name, value)?;
            if field.name == WINDOW_COLUMN {
                if let Value::Int(secs) = value {
                    map.serialize_entry(WINDOW_TIME_COLUMN, &format_window_start(*secs))?;
                }
            }
        }
        map.end()
    }
}

/// Formats window start seconds as RFC 3339 UTC, e.g. `2024-01-01T00:00:10Z`.
pub fn format_window_start(secs: i64) -> Option<String> {
    DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
}

/// Writes `table` as newline-delimited JSON. Returns the number of rows.
pub fn write_table<W: Write>(table: &Table, mut out: W) -> Result<usize> {
    let mut written = 0;
    for view in table.views() {
        serde_json::to_writer(&mut out, &JsonRow { table, view })
            .context("serializing row to JSON")?;
        out.write_all(b"\n").context("writing row delimiter")?;
        written += 1;
    }
    out.flush().context("flushing JSON output")?;
    Ok(written)
}
