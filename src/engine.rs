use crate::{
    config::TrackerConfig,
    dataset::{Dataset, Record},
    error::TrackerError,
    filter::{self, Predicates, Selection, View},
    map_view::{self, MapLayer},
    persistence::{LoadCache, PersistenceGateway},
    progress::Progress,
    reconcile::{ReconcileReport, reconcile},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub type OpId = String;
pub type RunId = String;

/// One data-editor change, addressed by row index within the current view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowEdit {
    pub row: usize,
    #[serde(default)]
    pub visited: Option<bool>,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    SetFilter {
        column: String,
        value: Option<String>,
    },
    ClearFilters,
    SetVisited {
        key: String,
        visited: bool,
    },
    SetRemarks {
        key: String,
        remarks: String,
    },
    ApplyEdits {
        edits: Vec<RowEdit>,
    },
    Save,
    Reload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub run_id: RunId,
    pub ops: Vec<Operation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpResult {
    pub op_id: OpId,
    pub changed_keys: Vec<String>,
    pub changed_rows: Vec<usize>,
    pub warnings: Vec<String>,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub run_id: RunId,
    pub op: Operation,
    pub result: OpResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: String,
    pub supported_operations: Vec<String>,
    pub export_format: String,
    pub deterministic_operation_log: bool,
}

/// A filter the presentation layer can offer, with its selectable values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterChoice {
    pub column: String,
    pub options: Vec<String>,
    pub selected: Selection,
}

pub trait Engine {
    fn apply(&mut self, op: Operation) -> Result<OpResult, TrackerError>;
    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>, TrackerError>;
    fn snapshot(&self) -> &Dataset;
}

/// Session state for one operator: the loaded dataset, the active filters and
/// the gateway that persists them.
#[derive(Debug, Clone)]
pub struct TrackerEngine {
    gateway: PersistenceGateway,
    dataset: Dataset,
    predicates: Predicates,
    popup_columns: Vec<String>,
    missing_placeholder: String,
    export_file_name: String,
    journal: Vec<OperationRecord>,
    op_counter: u64,
    unsaved_changes: bool,
}

impl TrackerEngine {
    pub fn open(config: &TrackerConfig) -> Result<Self, TrackerError> {
        Self::with_gateway(config, PersistenceGateway::new(config, LoadCache::new()))
    }

    pub fn with_gateway(
        config: &TrackerConfig,
        mut gateway: PersistenceGateway,
    ) -> Result<Self, TrackerError> {
        let dataset = gateway.load()?;
        Ok(Self {
            gateway,
            dataset,
            predicates: Predicates::new(),
            popup_columns: config.popup_columns.clone(),
            missing_placeholder: config.missing_placeholder.clone(),
            export_file_name: config.export_file_name.clone(),
            journal: vec![],
            op_counter: 0,
            unsaved_changes: false,
        })
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub fn predicates(&self) -> &Predicates {
        &self.predicates
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved_changes
    }

    pub fn operation_log(&self) -> &[OperationRecord] {
        &self.journal
    }

    pub fn view(&self) -> View {
        filter::filter(&self.dataset, &self.predicates)
    }

    pub fn progress(&self) -> Progress {
        Progress::of_view(&self.view())
    }

    pub fn map_layer(&self) -> MapLayer {
        map_view::project(
            &self.dataset,
            &self.view(),
            &self.popup_columns,
            &self.missing_placeholder,
        )
    }

    pub fn filter_options(&self, column: &str) -> Vec<String> {
        filter::options(&self.dataset, column)
    }

    /// District and priority pickers, for whichever of the two columns exist.
    pub fn standard_filters(&self) -> Vec<FilterChoice> {
        let schema = self.dataset.schema();
        let roles = schema.roles();
        [roles.district, roles.priority]
            .into_iter()
            .flatten()
            .map(|idx| {
                let column = schema.descriptive_name(idx).to_string();
                FilterChoice {
                    options: self.filter_options(&column),
                    selected: self.predicates.get(&column).clone(),
                    column,
                }
            })
            .collect()
    }

    /// CSV bytes of the in-memory dataset, including unsaved edits.
    pub fn export(&self) -> Result<Vec<u8>, TrackerError> {
        self.gateway.export(&self.dataset)
    }

    pub fn export_file_name(&self) -> &str {
        &self.export_file_name
    }

    pub fn capabilities() -> Capabilities {
        Capabilities {
            protocol_version: "v1".to_string(),
            supported_operations: vec![
                "SetFilter".to_string(),
                "ClearFilters".to_string(),
                "SetVisited".to_string(),
                "SetRemarks".to_string(),
                "ApplyEdits".to_string(),
                "Save".to_string(),
                "Reload".to_string(),
            ],
            export_format: "csv".to_string(),
            deterministic_operation_log: true,
        }
    }

    fn next_op_id(&mut self) -> OpId {
        self.op_counter += 1;
        format!("op-{}", self.op_counter)
    }

    fn edit_by_key<F>(&mut self, key: &str, edit: F) -> Result<ReconcileReport, TrackerError>
    where
        F: FnOnce(&mut Record),
    {
        let Some(key_column) = self.dataset.schema().key_column().map(str::to_string) else {
            return Err(TrackerError::precondition(
                "Dataset has no key column; use ApplyEdits on an unfiltered view instead",
            ));
        };
        let mut view = filter::filter(
            &self.dataset,
            &Predicates::new().with(&key_column, Selection::Value(key.to_string())),
        );
        let row = view
            .row_by_key_mut(key)
            .ok_or_else(|| TrackerError::not_found(format!("Site '{key}' not found")))?;
        edit(&mut row.record);
        reconcile(&mut self.dataset, &view)
    }

    fn apply_row_edits(&mut self, edits: &[RowEdit]) -> Result<ReconcileReport, TrackerError> {
        let mut view = self.view();
        if let Some(bad) = edits.iter().find(|e| e.row >= view.len()) {
            return Err(TrackerError::invalid_input(format!(
                "Edit addresses row {} but the current view has {} rows",
                bad.row,
                view.len()
            )));
        }
        for edit in edits {
            let record = &mut view.rows_mut()[edit.row].record;
            if let Some(visited) = edit.visited {
                record.visited = visited;
            }
            if let Some(remarks) = &edit.remarks {
                record.remarks = remarks.clone();
            }
        }
        reconcile(&mut self.dataset, &view)
    }

    fn absorb_report(&mut self, report: ReconcileReport, result: &mut OpResult) {
        if report.changed() > 0 {
            self.unsaved_changes = true;
        }
        result.messages.push(format!(
            "Updated {} site(s), {} unchanged",
            report.changed(),
            report.unchanged
        ));
        for key in &report.ignored_keys {
            result.warnings.push(format!("Ignored edit for unknown site '{key}'"));
        }
        result.changed_keys = report.changed_keys;
        result.changed_rows = report.changed_positions;
    }

    fn apply_internal(&mut self, op: Operation) -> Result<OpResult, TrackerError> {
        let mut result = OpResult {
            op_id: self.next_op_id(),
            ..OpResult::default()
        };
        match op {
            Operation::SetFilter { column, value } => {
                if self.dataset.schema().column(&column).is_none() {
                    result
                        .warnings
                        .push(format!("Unknown filter column '{column}' ignored"));
                } else {
                    self.predicates.set(&column, Selection::from_option(value));
                    let view = self.view();
                    result.messages.push(format!(
                        "Filter on '{column}' shows {} of {} sites",
                        view.len(),
                        self.dataset.len()
                    ));
                }
            }
            Operation::ClearFilters => {
                self.predicates.clear();
                result.messages.push("Cleared all filters".to_string());
            }
            Operation::SetVisited { key, visited } => {
                let report = self.edit_by_key(&key, |record| record.visited = visited)?;
                self.absorb_report(report, &mut result);
            }
            Operation::SetRemarks { key, remarks } => {
                let report = self.edit_by_key(&key, |record| record.remarks = remarks)?;
                self.absorb_report(report, &mut result);
            }
            Operation::ApplyEdits { edits } => {
                let report = self.apply_row_edits(&edits)?;
                self.absorb_report(report, &mut result);
            }
            Operation::Save => {
                self.gateway.save(&self.dataset)?;
                self.unsaved_changes = false;
                result.messages.push(format!(
                    "Saved {} sites to '{}'",
                    self.dataset.len(),
                    self.gateway.working_copy_path().display()
                ));
            }
            Operation::Reload => {
                if self.unsaved_changes {
                    result
                        .warnings
                        .push("Discarded unsaved edits".to_string());
                }
                self.dataset = self.gateway.load()?;
                self.unsaved_changes = false;
                result
                    .messages
                    .push(format!("Reloaded {} sites", self.dataset.len()));
            }
        }
        debug!(op_id = %result.op_id, changed = result.changed_rows.len(), "applied operation");
        Ok(result)
    }
}

impl Engine for TrackerEngine {
    fn apply(&mut self, op: Operation) -> Result<OpResult, TrackerError> {
        let run_id = "interactive".to_string();
        let result = self.apply_internal(op.clone())?;
        self.journal.push(OperationRecord {
            run_id,
            op,
            result: result.clone(),
        });
        Ok(result)
    }

    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>, TrackerError> {
        info!(run_id = %wf.run_id, ops = wf.ops.len(), "running workflow");
        let mut results = Vec::new();
        for op in &wf.ops {
            let result = self.apply_internal(op.clone())?;
            self.journal.push(OperationRecord {
                run_id: wf.run_id.clone(),
                op: op.clone(),
                result: result.clone(),
            });
            results.push(result);
        }
        Ok(results)
    }

    fn snapshot(&self) -> &Dataset {
        &self.dataset
    }
}
