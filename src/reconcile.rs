//! Merging edited view rows back into the authoritative dataset.
//!
//! Only `visited` and `remarks` ever flow back. Rows the view does not carry
//! and every descriptive or coordinate field are left exactly as they were.

use crate::dataset::Dataset;
use crate::error::TrackerError;
use crate::filter::View;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Keys of rows whose mutable fields changed (keyed datasets only).
    pub changed_keys: Vec<String>,
    /// Dataset positions of rows whose mutable fields changed.
    pub changed_positions: Vec<usize>,
    pub unchanged: usize,
    /// Keys present in the view but not in the dataset.
    pub ignored_keys: Vec<String>,
}

impl ReconcileReport {
    pub fn changed(&self) -> usize {
        self.changed_positions.len()
    }
}

/// Applies the mutable fields of `edited` to `dataset`.
///
/// Keyed datasets match rows by key. Datasets without a key column fall back
/// to positional alignment, which is refused unless the view is unfiltered
/// and covers every row in dataset order.
pub fn reconcile(dataset: &mut Dataset, edited: &View) -> Result<ReconcileReport, TrackerError> {
    let key_idx = dataset.schema().roles().key;
    let report = match key_idx {
        Some(key_idx) => reconcile_by_key(dataset, key_idx, edited),
        None => reconcile_by_position(dataset, edited)?,
    };
    debug!(
        changed = report.changed(),
        unchanged = report.unchanged,
        ignored = report.ignored_keys.len(),
        "reconciled view into dataset"
    );
    Ok(report)
}

fn reconcile_by_key(dataset: &mut Dataset, key_idx: usize, edited: &View) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut lookup: HashMap<&str, (bool, &str)> = HashMap::with_capacity(edited.len());
    for row in edited.rows() {
        match row.key.as_deref() {
            Some(key) => {
                lookup.insert(key, (row.record.visited, row.record.remarks.as_str()));
            }
            None => warn!(position = row.position, "edited row has no key, skipping"),
        }
    }

    let mut matched = 0usize;
    for (position, record) in dataset.records_mut().iter_mut().enumerate() {
        let Some((visited, remarks)) = lookup.remove(record.fields[key_idx].as_str()) else {
            continue;
        };
        matched += 1;
        if record.visited == visited && record.remarks == remarks {
            report.unchanged += 1;
            continue;
        }
        record.visited = visited;
        record.remarks = remarks.to_string();
        report.changed_keys.push(record.fields[key_idx].clone());
        report.changed_positions.push(position);
    }

    if !lookup.is_empty() {
        let mut ignored: Vec<String> = lookup.into_keys().map(str::to_string).collect();
        ignored.sort_unstable();
        warn!(count = ignored.len(), keys = ?ignored, "edited rows with unknown keys were ignored");
        report.ignored_keys = ignored;
    }
    debug!(matched, "keyed reconciliation");
    report
}

fn reconcile_by_position(
    dataset: &mut Dataset,
    edited: &View,
) -> Result<ReconcileReport, TrackerError> {
    if edited.is_filtered() {
        return Err(TrackerError::precondition(
            "Dataset has no key column; edits from a filtered view cannot be matched to rows. \
             Clear the filters before editing.",
        ));
    }
    if edited.len() != dataset.len() {
        return Err(TrackerError::precondition(format!(
            "Dataset has no key column and the view has {} rows instead of {}",
            edited.len(),
            dataset.len()
        )));
    }
    if let Some(row) = edited
        .rows()
        .iter()
        .enumerate()
        .find_map(|(idx, row)| (row.position != idx).then_some(row))
    {
        return Err(TrackerError::precondition(format!(
            "Dataset has no key column and view row for position {} is out of order",
            row.position
        )));
    }

    let mut report = ReconcileReport::default();
    for (position, (record, row)) in dataset
        .records_mut()
        .iter_mut()
        .zip(edited.rows())
        .enumerate()
    {
        if record.same_mutable_fields(&row.record) {
            report.unchanged += 1;
            continue;
        }
        record.visited = row.record.visited;
        record.remarks = row.record.remarks.clone();
        report.changed_positions.push(position);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnNames;
    use crate::error::ErrorCode;
    use crate::filter::{Predicates, Selection, filter};
    use crate::schema::{RawTable, normalize};

    fn table(headers: &[&str], rows: &[&[&str]]) -> Dataset {
        let raw = RawTable {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        };
        normalize(raw, &ColumnNames::default()).unwrap()
    }

    fn keyed() -> Dataset {
        table(
            &["Custcd", "CD Name", "District", "Latitude", "Longitude"],
            &[
                &["A1", "Steel Works", "X", "26.9", "75.8"],
                &["A2", "Paper Mill", "Y", "27.1", "N/A"],
                &["A3", "Dye House", "X", "", ""],
            ],
        )
    }

    fn district(value: &str) -> Predicates {
        Predicates::new().with("District", Selection::parse(value))
    }

    #[test]
    fn test_filtered_edit_updates_only_that_row() {
        let mut ds = keyed();
        let before = ds.clone();
        let mut view = filter(&ds, &district("X"));
        view.row_by_key_mut("A1").unwrap().record.visited = true;
        view.row_by_key_mut("A1").unwrap().record.remarks = "owner met".into();

        let report = reconcile(&mut ds, &view).unwrap();
        assert_eq!(report.changed_keys, vec!["A1"]);
        assert_eq!(report.unchanged, 1);
        assert!(ds.find("A1").unwrap().visited);
        assert_eq!(ds.find("A1").unwrap().remarks, "owner met");
        assert_eq!(ds.records()[1], before.records()[1]);
        assert_eq!(ds.records()[2], before.records()[2]);
    }

    #[test]
    fn test_immutable_fields_are_never_copied() {
        let mut ds = keyed();
        let mut view = filter(&ds, &Predicates::new());
        let row = view.row_by_key_mut("A2").unwrap();
        row.record.fields[1] = "Tampered".into();
        row.record.fields[2] = "Z".into();
        row.record.latitude = Some(0.0);
        row.record.longitude = Some(0.0);
        row.record.visited = true;

        reconcile(&mut ds, &view).unwrap();
        let a2 = ds.find("A2").unwrap();
        assert!(a2.visited);
        assert_eq!(a2.fields, vec!["A2", "Paper Mill", "Y"]);
        assert_eq!(a2.latitude, Some(27.1));
        assert_eq!(a2.longitude, None);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let mut ds = keyed();
        let mut view = filter(&ds, &district("Y"));
        view.rows_mut()[0].key = Some("ZZ".into());
        view.rows_mut()[0].record.visited = true;

        let report = reconcile(&mut ds, &view).unwrap();
        assert_eq!(report.ignored_keys, vec!["ZZ"]);
        assert_eq!(report.changed(), 0);
        assert!(ds.records().iter().all(|r| !r.visited));
    }

    #[test]
    fn test_positional_merge_without_key() {
        let mut ds = table(&["CD Name", "District"], &[&["Mill", "X"], &["Kiln", "Y"]]);
        let mut view = filter(&ds, &Predicates::new());
        view.rows_mut()[1].record.remarks = "closed".into();

        let report = reconcile(&mut ds, &view).unwrap();
        assert_eq!(report.changed_positions, vec![1]);
        assert!(report.changed_keys.is_empty());
        assert_eq!(ds.records()[1].remarks, "closed");
        assert_eq!(ds.records()[0].remarks, "");
    }

    #[test]
    fn test_filtered_view_without_key_is_refused() {
        let mut ds = table(&["CD Name", "District"], &[&["Mill", "X"], &["Kiln", "Y"]]);
        let before = ds.clone();
        let mut view = filter(&ds, &district("Y"));
        view.rows_mut()[0].record.visited = true;

        let err = reconcile(&mut ds, &view).unwrap_err();
        assert_eq!(err.code, ErrorCode::Precondition);
        assert_eq!(ds, before);
    }

    #[test]
    fn test_active_filter_matching_everything_is_still_refused_without_key() {
        let mut ds = table(&["CD Name", "District"], &[&["Mill", "X"], &["Kiln", "X"]]);
        let view = filter(&ds, &district("X"));
        assert_eq!(view.len(), ds.len());
        assert!(reconcile(&mut ds, &view).is_err());
    }
}
