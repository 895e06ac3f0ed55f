//! Loading and saving the site table.
//!
//! The working copy (CSV) is authoritative once it exists; until then the
//! pristine source document is read and normalized. Saves go through a
//! temporary file in the target directory that is renamed over the working
//! copy, so a failed save leaves the previous file untouched.

use crate::config::{ColumnNames, TrackerConfig};
use crate::dataset::Dataset;
use crate::error::TrackerError;
use crate::schema::{RawTable, normalize};
use calamine::{Data, Reader, open_workbook_auto};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    Csv,
    Spreadsheet,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Result<Self, TrackerError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(SourceFormat::Spreadsheet),
            _ => Err(TrackerError::invalid_input(format!(
                "Unsupported source format for '{}'",
                path.display()
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadOrigin {
    WorkingCopy,
    PristineSource,
    Cache,
}

pub fn read_csv_table<R: Read>(reader: R) -> Result<RawTable, TrackerError> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = rdr.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok(RawTable { headers, rows })
}

fn read_csv_file(path: &Path) -> Result<RawTable, TrackerError> {
    let file = fs::File::open(path)
        .map_err(|e| TrackerError::io(format!("Could not open '{}': {e}", path.display())))?;
    read_csv_table(file).map_err(|e| TrackerError {
        code: e.code,
        message: format!("Could not parse CSV '{}': {}", path.display(), e.message),
    })
}

fn spreadsheet_cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => crate::dataset::flag_text(*b).to_string(),
        other => other.to_string(),
    }
}

/// Reads the first worksheet; its first row is the header. Fully blank rows
/// are not sites and are skipped.
fn read_spreadsheet(path: &Path) -> Result<RawTable, TrackerError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        TrackerError::invalid_input(format!(
            "Could not open spreadsheet '{}': {e}",
            path.display()
        ))
    })?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| {
            TrackerError::invalid_input(format!(
                "Spreadsheet '{}' has no worksheets",
                path.display()
            ))
        })?
        .map_err(|e| {
            TrackerError::invalid_input(format!(
                "Could not read first worksheet of '{}': {e}",
                path.display()
            ))
        })?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| {
            TrackerError::invalid_input(format!("Spreadsheet '{}' is empty", path.display()))
        })?
        .iter()
        .map(spreadsheet_cell_text)
        .collect();
    let rows = rows
        .map(|row| row.iter().map(spreadsheet_cell_text).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .collect();
    Ok(RawTable { headers, rows })
}

pub fn read_table(path: &Path) -> Result<RawTable, TrackerError> {
    match SourceFormat::from_path(path)? {
        SourceFormat::Csv => read_csv_file(path),
        SourceFormat::Spreadsheet => read_spreadsheet(path),
    }
}

/// Writes the whole dataset (header row first) as CSV.
pub fn write_csv<W: Write>(dataset: &Dataset, writer: W) -> Result<(), TrackerError> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    wtr.write_record(dataset.schema().headers())?;
    for record in dataset.records() {
        wtr.write_record(dataset.row_cells(record).iter().map(|c| c.as_bytes()))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn to_csv_bytes(dataset: &Dataset) -> Result<Vec<u8>, TrackerError> {
    let mut buffer = Vec::new();
    write_csv(dataset, &mut buffer)?;
    Ok(buffer)
}

/// Result of the last uncached load. Stored by the gateway and dropped on
/// every successful save.
#[derive(Debug, Clone, Default)]
pub struct LoadCache {
    cached: Option<Dataset>,
    invalidations: u64,
}

impl LoadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&Dataset> {
        self.cached.as_ref()
    }

    pub fn store(&mut self, dataset: Dataset) {
        self.cached = Some(dataset);
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
        self.invalidations += 1;
    }

    pub fn is_populated(&self) -> bool {
        self.cached.is_some()
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceGateway {
    source_path: PathBuf,
    working_copy_path: PathBuf,
    columns: ColumnNames,
    cache: LoadCache,
    last_origin: Option<LoadOrigin>,
}

impl PersistenceGateway {
    pub fn new(config: &TrackerConfig, cache: LoadCache) -> Self {
        Self {
            source_path: config.source_path.clone(),
            working_copy_path: config.working_copy_path.clone(),
            columns: config.columns.clone(),
            cache,
            last_origin: None,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn working_copy_path(&self) -> &Path {
        &self.working_copy_path
    }

    pub fn cache(&self) -> &LoadCache {
        &self.cache
    }

    pub fn last_origin(&self) -> Option<LoadOrigin> {
        self.last_origin
    }

    /// Cached load. Reads from disk only when the cache is empty.
    pub fn load(&mut self) -> Result<Dataset, TrackerError> {
        if let Some(dataset) = self.cache.get() {
            self.last_origin = Some(LoadOrigin::Cache);
            return Ok(dataset.clone());
        }
        let (dataset, origin) = self.load_uncached()?;
        self.cache.store(dataset.clone());
        self.last_origin = Some(origin);
        Ok(dataset)
    }

    /// Working copy if present, otherwise the pristine source.
    pub fn load_uncached(&self) -> Result<(Dataset, LoadOrigin), TrackerError> {
        let (path, origin) = if self.working_copy_path.exists() {
            (&self.working_copy_path, LoadOrigin::WorkingCopy)
        } else {
            (&self.source_path, LoadOrigin::PristineSource)
        };
        if !path.exists() {
            return Err(TrackerError::not_found(format!(
                "Neither working copy '{}' nor source '{}' exists",
                self.working_copy_path.display(),
                self.source_path.display()
            )));
        }
        let raw = match origin {
            LoadOrigin::WorkingCopy => read_csv_file(path)?,
            _ => read_table(path)?,
        };
        let dataset = normalize(raw, &self.columns).map_err(|e| TrackerError {
            code: e.code,
            message: format!("{} ('{}')", e.message, path.display()),
        })?;
        info!(
            path = %path.display(),
            origin = ?origin,
            rows = dataset.len(),
            "loaded site table"
        );
        Ok((dataset, origin))
    }

    /// Replaces the working copy with `dataset` and drops the load cache.
    pub fn save(&mut self, dataset: &Dataset) -> Result<(), TrackerError> {
        let target = &self.working_copy_path;
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| {
            TrackerError::io(format!("Could not create directory '{}': {e}", dir.display()))
        })?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| {
            TrackerError::io(format!(
                "Could not create temporary file in '{}': {e}",
                dir.display()
            ))
        })?;
        write_csv(dataset, &mut tmp).map_err(|e| TrackerError {
            code: e.code,
            message: format!("Could not write working copy: {}", e.message),
        })?;
        tmp.as_file().sync_all().map_err(|e| {
            TrackerError::io(format!("Could not flush working copy: {e}"))
        })?;
        tmp.persist(target).map_err(|e| {
            TrackerError::io(format!(
                "Could not replace working copy '{}': {}",
                target.display(),
                e.error
            ))
        })?;

        self.cache.invalidate();
        info!(path = %target.display(), rows = dataset.len(), "saved working copy");
        Ok(())
    }

    /// CSV bytes of `dataset`, independent of what is on disk.
    pub fn export(&self, dataset: &Dataset) -> Result<Vec<u8>, TrackerError> {
        let bytes = to_csv_bytes(dataset)?;
        info!(rows = dataset.len(), bytes = bytes.len(), "exported site table");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::filter::{Predicates, Selection, filter};
    use crate::reconcile::reconcile;
    use crate::schema::ColumnRole;
    use rust_xlsxwriter::Workbook;
    use tempfile::tempdir;

    const PRISTINE: &str = "\
Custcd,CD Name,District,Priority,Mobile Number,Latitude,Longitude
A1,Steel Works,X,High,9876543210,26.9120,75.7873
A2,Paper Mill,Y,Low,9123456789,N/A,75.1
";

    fn gateway(root: &Path) -> PersistenceGateway {
        let config = TrackerConfig::default()
            .with_source(root.join("sites.csv"))
            .with_working_copy(root.join("working").join("visits.csv"));
        PersistenceGateway::new(&config, LoadCache::new())
    }

    #[test]
    fn test_first_load_uses_pristine_source() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("sites.csv"), PRISTINE).unwrap();
        let mut gw = gateway(td.path());

        let ds = gw.load().unwrap();
        assert_eq!(gw.last_origin(), Some(LoadOrigin::PristineSource));
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.schema().column("Visited").map(|c| c.role), Some(ColumnRole::Visited));
        assert_eq!(ds.records()[1].latitude, None);
        assert!(gw.cache().is_populated());

        gw.load().unwrap();
        assert_eq!(gw.last_origin(), Some(LoadOrigin::Cache));
    }

    #[test]
    fn test_missing_sources_are_fatal() {
        let td = tempdir().unwrap();
        let mut gw = gateway(td.path());
        let err = gw.load().unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(!gw.cache().is_populated());
    }

    #[test]
    fn test_corrupt_working_copy_is_fatal() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("sites.csv"), PRISTINE).unwrap();
        fs::create_dir_all(td.path().join("working")).unwrap();
        fs::write(
            td.path().join("working").join("visits.csv"),
            "Custcd,District\nA1,X,extra\n",
        )
        .unwrap();
        let err = gateway(td.path()).load().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_empty_working_copy_is_fatal() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("sites.csv"), PRISTINE).unwrap();
        fs::create_dir_all(td.path().join("working")).unwrap();
        let working = td.path().join("working").join("visits.csv");
        fs::write(&working, "").unwrap();

        let mut gw = gateway(td.path());
        let err = gw.load().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.message.contains("visits.csv"));
        assert!(!gw.cache().is_populated());
        assert_eq!(fs::read(&working).unwrap(), b"");
    }

    #[test]
    fn test_unsupported_source_extension() {
        let td = tempdir().unwrap();
        let path = td.path().join("sites.txt");
        fs::write(&path, "x").unwrap();
        let config = TrackerConfig::default()
            .with_source(&path)
            .with_working_copy(td.path().join("visits.csv"));
        let err = PersistenceGateway::new(&config, LoadCache::new())
            .load()
            .unwrap_err();
        assert!(err.message.contains("Unsupported source format"));
    }

    #[test]
    fn test_source_format_by_extension() {
        assert_eq!(
            SourceFormat::from_path(Path::new("list.XLSX")).unwrap(),
            SourceFormat::Spreadsheet
        );
        assert_eq!(
            SourceFormat::from_path(Path::new("dir/list.csv")).unwrap(),
            SourceFormat::Csv
        );
        assert!(SourceFormat::from_path(Path::new("list")).is_err());
    }

    #[test]
    fn test_unreadable_spreadsheet_is_fatal() {
        let td = tempdir().unwrap();
        let path = td.path().join("sites.xlsx");
        fs::write(&path, "this is not a workbook").unwrap();
        let err = read_table(&path).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.message.contains("sites.xlsx"));
    }

    fn write_workbook(path: &Path) {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        let headers = [
            "Custcd",
            "CD Name",
            "District",
            "Mobile Number",
            "Latitude",
            "Longitude",
        ];
        for (col, header) in headers.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        sheet.write_number(1, 0, 1001.0).unwrap();
        sheet.write_string(1, 1, "Steel Works").unwrap();
        sheet.write_string(1, 2, "X").unwrap();
        sheet.write_number(1, 3, 9876543210.0).unwrap();
        sheet.write_number(1, 4, 26.912).unwrap();
        sheet.write_number(1, 5, 75.7873).unwrap();
        // Row 2 is left blank.
        sheet.write_number(3, 0, 1002.0).unwrap();
        sheet.write_string(3, 1, "Paper Mill").unwrap();
        sheet.write_boolean(3, 2, true).unwrap();
        sheet.write_string(3, 4, "N/A").unwrap();
        sheet.write_number(3, 5, 75.1).unwrap();
        workbook.save(path).unwrap();
    }

    #[test]
    fn test_spreadsheet_source_loads_and_round_trips() {
        let td = tempdir().unwrap();
        let source = td.path().join("sites.xlsx");
        write_workbook(&source);
        let config = TrackerConfig::default()
            .with_source(&source)
            .with_working_copy(td.path().join("visits.csv"));
        let mut gw = PersistenceGateway::new(&config, LoadCache::new());

        let first = gw.load().unwrap();
        assert_eq!(gw.last_origin(), Some(LoadOrigin::PristineSource));
        assert_eq!(
            first.schema().headers(),
            vec![
                "Custcd",
                "CD Name",
                "District",
                "Mobile Number",
                "Latitude",
                "Longitude",
                "Visited",
                "New Remarks"
            ]
        );
        assert_eq!(first.len(), 2);
        let a = first.find("1001").unwrap();
        assert_eq!(a.fields, vec!["1001", "Steel Works", "X", "9876543210"]);
        assert_eq!(a.location(), Some((26.912, 75.7873)));
        let b = first.find("1002").unwrap();
        assert_eq!(b.fields, vec!["1002", "Paper Mill", "True", ""]);
        assert_eq!(b.latitude, None);
        assert_eq!(b.longitude, Some(75.1));

        gw.save(&first).unwrap();
        let second = gw.load().unwrap();
        assert_eq!(gw.last_origin(), Some(LoadOrigin::WorkingCopy));
        assert_eq!(first, second);
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("sites.csv"), PRISTINE).unwrap();
        let mut gw = gateway(td.path());

        let first = gw.load().unwrap();
        gw.save(&first).unwrap();
        assert!(!gw.cache().is_populated());
        assert_eq!(gw.cache().invalidations(), 1);

        let second = gw.load().unwrap();
        assert_eq!(gw.last_origin(), Some(LoadOrigin::WorkingCopy));
        gw.save(&second).unwrap();
        let third = gw.load().unwrap();
        assert_eq!(second, third);
        assert_eq!(first.records(), second.records());

        let text = fs::read_to_string(gw.working_copy_path()).unwrap();
        let header = "Custcd,CD Name,District,Priority,Mobile Number,Latitude,Longitude,\
                      Visited,New Remarks\n";
        assert!(text.starts_with(header));
        assert!(text.contains("A1,Steel Works,X,High,9876543210,26.912,75.7873,False,\n"));
        assert!(text.contains("A2,Paper Mill,Y,Low,9123456789,,75.1,False,\n"));
    }

    #[test]
    fn test_filtered_edit_survives_save_and_reload() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("sites.csv"), PRISTINE).unwrap();
        let mut gw = gateway(td.path());
        let mut ds = gw.load().unwrap();

        let mut view = filter(&ds, &Predicates::new().with("District", Selection::parse("X")));
        assert_eq!(view.len(), 1);
        view.row_by_key_mut("A1").unwrap().record.visited = true;
        reconcile(&mut ds, &view).unwrap();
        gw.save(&ds).unwrap();

        let reloaded = gw.load().unwrap();
        assert!(reloaded.find("A1").unwrap().visited);
        assert!(!reloaded.find("A2").unwrap().visited);
        assert_eq!(reloaded, ds);
    }

    #[test]
    fn test_export_reflects_unsaved_edits() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("sites.csv"), PRISTINE).unwrap();
        let mut gw = gateway(td.path());
        let mut ds = gw.load().unwrap();
        gw.save(&ds).unwrap();
        let on_disk = fs::read(gw.working_copy_path()).unwrap();

        let mut view = filter(&ds, &Predicates::new());
        view.row_by_key_mut("A2").unwrap().record.remarks = "gate locked, \"retry\"".into();
        reconcile(&mut ds, &view).unwrap();

        let exported = gw.export(&ds).unwrap();
        let exported_text = String::from_utf8(exported.clone()).unwrap();
        assert!(exported_text.contains("\"gate locked, \"\"retry\"\"\""));
        assert_eq!(fs::read(gw.working_copy_path()).unwrap(), on_disk);

        let table = read_csv_table(exported.as_slice()).unwrap();
        let reparsed = normalize(table, &ColumnNames::default()).unwrap();
        assert_eq!(reparsed.find("A2").unwrap().remarks, "gate locked, \"retry\"");
    }

    #[test]
    fn test_failed_save_keeps_previous_working_copy() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("sites.csv"), PRISTINE).unwrap();
        let blocked = td.path().join("blocked");
        fs::create_dir_all(&blocked).unwrap();
        fs::write(blocked.join("keep.txt"), "previous").unwrap();

        // The working copy path is occupied by a directory, so the final rename fails.
        let config = TrackerConfig::default()
            .with_source(td.path().join("sites.csv"))
            .with_working_copy(&blocked);
        let mut gw = PersistenceGateway::new(&config, LoadCache::new());
        let (ds, _) = PersistenceGateway::new(
            &config.clone().with_working_copy(td.path().join("absent.csv")),
            LoadCache::new(),
        )
        .load_uncached()
        .unwrap();
        gw.cache.store(ds.clone());

        let err = gw.save(&ds).unwrap_err();
        assert_eq!(err.code, ErrorCode::Io);
        assert_eq!(fs::read_to_string(blocked.join("keep.txt")).unwrap(), "previous");
        assert!(gw.cache().is_populated());
        let leftovers: Vec<_> = fs::read_dir(td.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers.len(), 2, "{leftovers:?}");
    }
}
