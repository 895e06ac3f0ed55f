//! Equality filtering of the dataset into an editable [`View`].

use crate::dataset::{Dataset, Record};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Selection value meaning "no constraint" in presentation-layer pickers.
pub const ALL_SENTINEL: &str = "All";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    All,
    Value(String),
}

impl Selection {
    pub fn parse(text: &str) -> Self {
        if text == ALL_SENTINEL {
            Selection::All
        } else {
            Selection::Value(text.to_string())
        }
    }

    pub fn from_option(value: Option<String>) -> Self {
        value.map(Selection::Value).unwrap_or(Selection::All)
    }

    pub fn matches(&self, cell: &str) -> bool {
        match self {
            Selection::All => true,
            Selection::Value(wanted) => wanted == cell,
        }
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, Selection::Value(_))
    }
}

/// Column name to selection, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicates(BTreeMap<String, Selection>);

impl Predicates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, selection: Selection) -> Self {
        self.set(column, selection);
        self
    }

    pub fn set(&mut self, column: &str, selection: Selection) {
        match selection {
            Selection::All => {
                self.0.remove(column);
            }
            value => {
                self.0.insert(column.to_string(), value);
            }
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn get(&self, column: &str) -> &Selection {
        self.0.get(column).unwrap_or(&Selection::All)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Selection)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether any predicate constrains a column that `dataset` actually has.
    pub fn constrains(&self, dataset: &Dataset) -> bool {
        self.0
            .iter()
            .any(|(column, sel)| sel.is_constraint() && dataset.schema().column(column).is_some())
    }
}

/// A copied dataset row together with its identity in the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    pub position: usize,
    pub key: Option<String>,
    pub record: Record,
}

/// Filtered projection of a dataset. Never persisted; edits made to its rows
/// reach the dataset only through reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    rows: Vec<ViewRow>,
    filtered: bool,
    dataset_len: usize,
}

impl View {
    pub fn rows(&self) -> &[ViewRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [ViewRow] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True when at least one predicate narrowed the dataset.
    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    pub fn dataset_len(&self) -> usize {
        self.dataset_len
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.rows.iter().map(|row| &row.record)
    }

    pub fn row_by_key_mut(&mut self, key: &str) -> Option<&mut ViewRow> {
        self.rows
            .iter_mut()
            .find(|row| row.key.as_deref() == Some(key))
    }
}

/// Applies `predicates` to `dataset`. Predicates on columns the dataset lacks
/// are ignored.
pub fn filter(dataset: &Dataset, predicates: &Predicates) -> View {
    let active: Vec<(&str, &Selection)> = predicates
        .iter()
        .filter(|(column, sel)| sel.is_constraint() && dataset.schema().column(column).is_some())
        .collect();

    let rows: Vec<ViewRow> = dataset
        .records()
        .iter()
        .enumerate()
        .filter(|(_, record)| {
            active.iter().all(|(column, sel)| {
                dataset
                    .cell_text(record, column)
                    .map(|cell| sel.matches(&cell))
                    .unwrap_or(true)
            })
        })
        .map(|(position, record)| ViewRow {
            position,
            key: dataset.key_of(record).map(str::to_string),
            record: record.clone(),
        })
        .collect();

    debug!(
        predicates = active.len(),
        matched = rows.len(),
        total = dataset.len(),
        "filtered dataset"
    );
    View {
        rows,
        filtered: !active.is_empty(),
        dataset_len: dataset.len(),
    }
}

/// Distinct non-empty values of `column` in first-seen order. Empty when the
/// dataset has no such column.
pub fn options(dataset: &Dataset, column: &str) -> Vec<String> {
    if dataset.schema().column(column).is_none() {
        return vec![];
    }
    dataset
        .records()
        .iter()
        .filter_map(|record| dataset.cell_text(record, column))
        .filter(|value| !value.is_empty())
        .map(|value| value.into_owned())
        .unique()
        .collect()
}
