//! Read-only projection of a view onto map pins.
//!
//! Rows without a usable location stay in the table; they are only left off
//! the map.

use crate::dataset::{Dataset, Record};
use crate::filter::View;
use serde::{Deserialize, Serialize};

pub const VISITED_PIN_COLOR: &str = "#00ff00";
pub const PENDING_PIN_COLOR: &str = "#ff0000";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupField {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub key: Option<String>,
    pub label: String,
    pub latitude: f64,
    pub longitude: f64,
    pub visited: bool,
    pub color: String,
    pub popup: Vec<PopupField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum MapLayer {
    /// The dataset lacks a latitude or longitude column.
    NoLocationColumns,
    /// Coordinates exist, but no row of the current view has a usable pair.
    NoLocationInView,
    Points { points: Vec<MapPoint> },
}

impl MapLayer {
    /// Operator-facing notice for the empty cases.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            MapLayer::NoLocationColumns => {
                Some("The data has no location (Latitude/Longitude) columns.")
            }
            MapLayer::NoLocationInView => {
                Some("No location data is available for this filter.")
            }
            MapLayer::Points { .. } => None,
        }
    }

    pub fn points(&self) -> &[MapPoint] {
        match self {
            MapLayer::Points { points } => points.as_slice(),
            _ => &[],
        }
    }
}

pub fn is_valid_location(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// Field/value pairs shown for one site: the standard descriptive fields the
/// dataset has, then `extra_columns`. Blank values become `placeholder`;
/// columns the dataset lacks are skipped.
pub fn popup_fields(
    dataset: &Dataset,
    record: &Record,
    extra_columns: &[String],
    placeholder: &str,
) -> Vec<PopupField> {
    let roles = dataset.schema().roles();
    let standard = [roles.name, roles.district, roles.priority, roles.mobile];
    let mut fields: Vec<PopupField> = standard
        .into_iter()
        .flatten()
        .map(|idx| PopupField {
            field: dataset.schema().descriptive_name(idx).to_string(),
            value: display_value(&record.fields[idx], placeholder),
        })
        .collect();
    for column in extra_columns {
        if fields.iter().any(|f| f.field.trim() == column.trim()) {
            continue;
        }
        if let Some(value) = dataset.cell_text(record, column) {
            fields.push(PopupField {
                field: column.clone(),
                value: display_value(&value, placeholder),
            });
        }
    }
    fields
}

fn display_value(value: &str, placeholder: &str) -> String {
    if value.trim().is_empty() {
        placeholder.to_string()
    } else {
        value.to_string()
    }
}

pub fn project(
    dataset: &Dataset,
    view: &View,
    extra_columns: &[String],
    placeholder: &str,
) -> MapLayer {
    if !dataset.schema().has_location() {
        return MapLayer::NoLocationColumns;
    }
    let name_idx = dataset.schema().roles().name;
    let points: Vec<MapPoint> = view
        .rows()
        .iter()
        .filter_map(|row| {
            let (latitude, longitude) = row.record.location()?;
            if !is_valid_location(latitude, longitude) {
                return None;
            }
            let label = name_idx
                .map(|idx| row.record.fields[idx].trim())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .or_else(|| row.key.clone())
                .unwrap_or_else(|| format!("Row {}", row.position + 1));
            let color = if row.record.visited {
                VISITED_PIN_COLOR
            } else {
                PENDING_PIN_COLOR
            };
            Some(MapPoint {
                key: row.key.clone(),
                label,
                latitude,
                longitude,
                visited: row.record.visited,
                color: color.to_string(),
                popup: popup_fields(dataset, &row.record, extra_columns, placeholder),
            })
        })
        .collect();
    if points.is_empty() {
        MapLayer::NoLocationInView
    } else {
        MapLayer::Points { points }
    }
}
