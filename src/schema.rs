//! Schema descriptor and normalization of raw tables into a [`Dataset`].
//!
//! The descriptor is computed once from the header row. Every downstream
//! component consults its capability flags instead of probing for columns.

use crate::config::ColumnNames;
use crate::dataset::{Dataset, Record};
use crate::error::TrackerError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A table as read from disk, before any typing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnRole {
    /// Read-only text; the index points into [`Record::fields`].
    Descriptive(usize),
    Latitude,
    Longitude,
    Visited,
    Remarks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub role: ColumnRole,
}

/// Positions of well-known descriptive columns within [`Record::fields`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleColumns {
    pub key: Option<usize>,
    pub name: Option<usize>,
    pub district: Option<usize>,
    pub priority: Option<usize>,
    pub mobile: Option<usize>,
    pub zone: Option<usize>,
    pub industry_type: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaFlags {
    pub has_key: bool,
    pub has_location: bool,
    pub has_name: bool,
    pub has_district: bool,
    pub has_priority: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
    roles: RoleColumns,
    flags: SchemaFlags,
}

fn same_header(header: &str, wanted: &str) -> bool {
    header.trim() == wanted.trim()
}

impl Schema {
    /// Assigns roles to `headers` and appends the visited/remarks columns when
    /// the source has none. The first header matching a role wins; later
    /// duplicates stay descriptive.
    pub fn from_headers(headers: &[String], names: &ColumnNames) -> Self {
        let find = |wanted: &str| headers.iter().position(|h| same_header(h, wanted));
        let lat_pos = find(&names.latitude);
        let lon_pos = find(&names.longitude);
        let has_location = lat_pos.is_some() && lon_pos.is_some();
        let visited_pos = find(&names.visited);
        let remarks_pos = find(&names.remarks);

        let mut columns = Vec::with_capacity(headers.len() + 2);
        let mut descriptive = 0;
        for (pos, header) in headers.iter().enumerate() {
            let role = if has_location && Some(pos) == lat_pos {
                ColumnRole::Latitude
            } else if has_location && Some(pos) == lon_pos {
                ColumnRole::Longitude
            } else if Some(pos) == visited_pos {
                ColumnRole::Visited
            } else if Some(pos) == remarks_pos {
                ColumnRole::Remarks
            } else {
                descriptive += 1;
                ColumnRole::Descriptive(descriptive - 1)
            };
            columns.push(Column {
                name: header.clone(),
                role,
            });
        }
        if visited_pos.is_none() {
            columns.push(Column {
                name: names.visited.clone(),
                role: ColumnRole::Visited,
            });
        }
        if remarks_pos.is_none() {
            columns.push(Column {
                name: names.remarks.clone(),
                role: ColumnRole::Remarks,
            });
        }

        let descriptive_of = |wanted: &str| {
            columns.iter().find_map(|c| match c.role {
                ColumnRole::Descriptive(idx) if same_header(&c.name, wanted) => Some(idx),
                _ => None,
            })
        };
        let roles = RoleColumns {
            key: descriptive_of(&names.key),
            name: descriptive_of(&names.name),
            district: descriptive_of(&names.district),
            priority: descriptive_of(&names.priority),
            mobile: descriptive_of(&names.mobile),
            zone: descriptive_of(&names.zone),
            industry_type: descriptive_of(&names.industry_type),
        };
        let flags = SchemaFlags {
            has_key: roles.key.is_some(),
            has_location,
            has_name: roles.name.is_some(),
            has_district: roles.district.is_some(),
            has_priority: roles.priority.is_some(),
        };
        Self {
            columns,
            roles,
            flags,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn roles(&self) -> &RoleColumns {
        &self.roles
    }

    pub fn flags(&self) -> &SchemaFlags {
        &self.flags
    }

    pub fn has_key(&self) -> bool {
        self.flags.has_key
    }

    pub fn has_location(&self) -> bool {
        self.flags.has_location
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| same_header(&c.name, name))
    }

    pub fn descriptive_len(&self) -> usize {
        self.columns
            .iter()
            .filter(|c| matches!(c.role, ColumnRole::Descriptive(_)))
            .count()
    }

    pub fn descriptive_name(&self, idx: usize) -> &str {
        self.columns
            .iter()
            .find(|c| c.role == ColumnRole::Descriptive(idx))
            .map(|c| c.name.as_str())
            .unwrap_or_default()
    }

    pub fn key_column(&self) -> Option<&str> {
        self.roles.key.map(|idx| self.descriptive_name(idx))
    }

    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Lenient coordinate parse: anything that is not a finite number is missing.
pub fn parse_coordinate(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Lenient boolean parse for the visited column; unknown text is `false`.
pub fn parse_flag(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "1.0" | "yes" | "y"
    )
}

/// Turns a raw table into a typed dataset.
///
/// Bad cells are recovered locally. A missing header row, ragged rows and key
/// violations are structural problems and fail the whole load.
pub fn normalize(raw: RawTable, names: &ColumnNames) -> Result<Dataset, TrackerError> {
    if raw.headers.iter().all(|h| h.trim().is_empty()) {
        return Err(TrackerError::invalid_input("Table has no header row"));
    }
    let schema = Schema::from_headers(&raw.headers, names);
    let width = raw.headers.len();
    let descriptive = schema.descriptive_len();
    let mut unparsed_coordinates = 0usize;

    let mut records = Vec::with_capacity(raw.rows.len());
    for (pos, row) in raw.rows.into_iter().enumerate() {
        if row.len() != width {
            return Err(TrackerError::invalid_input(format!(
                "Row {} has {} cells, header has {width}",
                pos + 1,
                row.len()
            )));
        }
        let mut record = Record {
            fields: Vec::with_capacity(descriptive),
            latitude: None,
            longitude: None,
            visited: false,
            remarks: String::new(),
        };
        for (column, cell) in schema.columns().iter().zip(row) {
            match column.role {
                ColumnRole::Descriptive(_) => record.fields.push(cell),
                ColumnRole::Latitude | ColumnRole::Longitude => {
                    let value = parse_coordinate(&cell);
                    if value.is_none() && !cell.trim().is_empty() {
                        unparsed_coordinates += 1;
                    }
                    if column.role == ColumnRole::Latitude {
                        record.latitude = value;
                    } else {
                        record.longitude = value;
                    }
                }
                ColumnRole::Visited => record.visited = parse_flag(&cell),
                ColumnRole::Remarks => record.remarks = cell,
            }
        }
        records.push(record);
    }

    if unparsed_coordinates > 0 {
        warn!(
            count = unparsed_coordinates,
            "coordinate cells could not be parsed and were treated as missing"
        );
    }
    debug!(
        rows = records.len(),
        columns = schema.columns().len(),
        flags = ?schema.flags(),
        "normalized table"
    );
    Dataset::new(schema, records)
}
