//! In-memory site table: records plus the schema they were normalized against.

use crate::error::TrackerError;
use crate::schema::{ColumnRole, Schema};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashSet;

/// One site. Descriptive values are stored in schema order; the mutable and
/// coordinate fields are typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub fields: Vec<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub visited: bool,
    pub remarks: String,
}

impl Record {
    pub fn location(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn same_mutable_fields(&self, other: &Record) -> bool {
        self.visited == other.visited && self.remarks == other.remarks
    }
}

pub fn flag_text(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

/// Formats a coordinate the way it is written back to disk. `f64`'s
/// `Display` is the shortest text that parses back to the same value.
pub fn coordinate_text(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Only built through [`Dataset::new`], so it is serializable but not
/// deserializable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    schema: Schema,
    records: Vec<Record>,
}

impl Dataset {
    /// Checks record widths and, when a key column exists, key uniqueness.
    pub fn new(schema: Schema, records: Vec<Record>) -> Result<Self, TrackerError> {
        let width = schema.descriptive_len();
        if let Some(pos) = records.iter().position(|r| r.fields.len() != width) {
            return Err(TrackerError::invalid_input(format!(
                "Row {} has {} descriptive values, expected {width}",
                pos + 1,
                records[pos].fields.len()
            )));
        }
        if let Some(key_idx) = schema.roles().key {
            let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());
            for (pos, record) in records.iter().enumerate() {
                let key = record.fields[key_idx].as_str();
                if key.trim().is_empty() {
                    return Err(TrackerError::invalid_input(format!(
                        "Row {} has an empty '{}' key",
                        pos + 1,
                        schema.descriptive_name(key_idx)
                    )));
                }
                if !seen.insert(key) {
                    return Err(TrackerError::invalid_input(format!(
                        "Duplicate key '{key}' in column '{}' (row {})",
                        schema.descriptive_name(key_idx),
                        pos + 1
                    )));
                }
            }
        }
        Ok(Self { schema, records })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn key_of<'a>(&self, record: &'a Record) -> Option<&'a str> {
        self.schema
            .roles()
            .key
            .map(|idx| record.fields[idx].as_str())
    }

    pub fn position_of_key(&self, key: &str) -> Option<usize> {
        let idx = self.schema.roles().key?;
        self.records.iter().position(|r| r.fields[idx] == key)
    }

    pub fn find(&self, key: &str) -> Option<&Record> {
        self.position_of_key(key).map(|pos| &self.records[pos])
    }

    /// Text of any column for `record`, as it would be written to disk.
    /// `None` when the dataset has no such column.
    pub fn cell_text<'a>(&self, record: &'a Record, column: &str) -> Option<Cow<'a, str>> {
        let role = self.schema.column(column)?.role;
        Some(cell_for_role(record, role))
    }

    /// Full row in header order.
    pub fn row_cells<'a>(&self, record: &'a Record) -> Vec<Cow<'a, str>> {
        self.schema
            .columns()
            .iter()
            .map(|column| cell_for_role(record, column.role))
            .collect()
    }
}

pub(crate) fn cell_for_role(record: &Record, role: ColumnRole) -> Cow<'_, str> {
    match role {
        ColumnRole::Descriptive(idx) => Cow::Borrowed(record.fields[idx].as_str()),
        ColumnRole::Latitude => Cow::Owned(coordinate_text(record.latitude)),
        ColumnRole::Longitude => Cow::Owned(coordinate_text(record.longitude)),
        ColumnRole::Visited => Cow::Borrowed(flag_text(record.visited)),
        ColumnRole::Remarks => Cow::Borrowed(record.remarks.as_str()),
    }
}
