//! Tracker configuration: file locations and column names.

use crate::error::TrackerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_SOURCE_PATH: &str = "Merged_T7_Customer_List.xlsx";
pub const DEFAULT_WORKING_COPY_PATH: &str = "Updated_Customer_List.csv";
pub const EXPORT_FILE_NAME: &str = "Final_Updated_Customer_List.csv";
pub const DEFAULT_MISSING_PLACEHOLDER: &str = "N/A";

/// Header names for every column the tracker gives a role to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub key: String,
    pub name: String,
    pub district: String,
    pub priority: String,
    pub mobile: String,
    pub zone: String,
    pub industry_type: String,
    pub latitude: String,
    pub longitude: String,
    pub visited: String,
    pub remarks: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            key: "Custcd".to_string(),
            name: "CD Name".to_string(),
            district: "District".to_string(),
            priority: "Priority".to_string(),
            mobile: "Mobile Number".to_string(),
            zone: "Zone".to_string(),
            industry_type: "Ind Type".to_string(),
            latitude: "Latitude".to_string(),
            longitude: "Longitude".to_string(),
            visited: "Visited".to_string(),
            remarks: "New Remarks".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Pristine spreadsheet (or CSV) used only until a working copy exists.
    pub source_path: PathBuf,
    /// Working copy, authoritative once it exists.
    pub working_copy_path: PathBuf,
    pub export_file_name: String,
    pub columns: ColumnNames,
    /// Extra columns shown in map popups after the standard fields.
    pub popup_columns: Vec<String>,
    pub missing_placeholder: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from(DEFAULT_SOURCE_PATH),
            working_copy_path: PathBuf::from(DEFAULT_WORKING_COPY_PATH),
            export_file_name: EXPORT_FILE_NAME.to_string(),
            columns: ColumnNames::default(),
            popup_columns: vec![],
            missing_placeholder: DEFAULT_MISSING_PLACEHOLDER.to_string(),
        }
    }
}

impl TrackerConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, TrackerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::io(format!("Could not read config file '{}': {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            TrackerError::invalid_input(format!(
                "Could not parse config JSON '{}': {e}",
                path.display()
            ))
        })
    }

    /// Missing file means defaults; a present but broken file is an error.
    pub fn load_or_default(path: &Path) -> Result<Self, TrackerError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), TrackerError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| TrackerError::internal(format!("Could not serialize config: {e}")))?;
        std::fs::write(path, text).map_err(|e| {
            TrackerError::io(format!("Could not write config file '{}': {e}", path.display()))
        })
    }

    pub fn with_working_copy(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_copy_path = path.into();
        self
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: TrackerConfig = serde_json::from_str(
            r#"{"working_copy_path": "visits.csv", "columns": {"key": "Site ID"}}"#,
        )
        .unwrap();
        assert_eq!(config.working_copy_path, PathBuf::from("visits.csv"));
        assert_eq!(config.source_path, PathBuf::from(DEFAULT_SOURCE_PATH));
        assert_eq!(config.columns.key, "Site ID");
        assert_eq!(config.columns.remarks, "New Remarks");
        assert_eq!(config.export_file_name, EXPORT_FILE_NAME);
    }

    #[test]
    fn test_save_and_load_config() {
        let td = tempdir().unwrap();
        let path = td.path().join("tracker.json");
        let mut config = TrackerConfig::default().with_source(td.path().join("sites.xlsx"));
        config.popup_columns = vec!["Survey Note".to_string()];
        config.save_to_path(&path).unwrap();
        let loaded = TrackerConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let td = tempdir().unwrap();
        let config = TrackerConfig::load_or_default(&td.path().join("absent.json")).unwrap();
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn test_broken_config_file_is_an_error() {
        let td = tempdir().unwrap();
        let path = td.path().join("tracker.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = TrackerConfig::load_or_default(&path).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidInput);
    }
}
