//! Input reading for facility and court files.
//!
//! Facility rows come from delimited text or spreadsheets; both are reduced
//! to raw string rows and mapped through the same header alias table.
//! Geocoded cache files and court collaborator CSVs also live here.

pub mod cache;
pub mod courts;
mod delimited;
pub mod headers;
mod spreadsheet;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use courtlink_shared::{CourtLinkError, FacilityField, FacilityRecord, Result};
use tracing::{info, instrument, warn};

pub use cache::{CacheWriter, CachedGeocode, GeocodeColumns, query_key, read_cache};
pub use courts::{CourtCountyRow, CourtRow, CsvLoad, read_court_counties, read_courts};
pub use headers::{HeaderMap, detect_header, normalize_header, resolve_alias};

/// Facility rows read from one file.
#[derive(Debug, Clone)]
pub struct FacilityBatch {
    pub source: PathBuf,
    /// Fields that had a column in the file. Absent columns are never diffed.
    pub columns: Vec<FacilityField>,
    pub records: Vec<FacilityRecord>,
    /// Later rows dropped because their name repeated an earlier row.
    pub duplicates_dropped: usize,
}

/// Supported input formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Delimited,
    Spreadsheet,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "tsv" | "txt" => Ok(Self::Delimited),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(Self::Spreadsheet),
            _ => Err(CourtLinkError::config(format!(
                "unsupported input file type '{}': expected csv, tsv, txt, xlsx, xls or ods",
                path.display()
            ))),
        }
    }
}

/// Read all facility rows from `path`.
///
/// A missing file is a configuration error; a file without a recognizable
/// header is a validation error.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn read_facilities(path: &Path) -> Result<FacilityBatch> {
    let rows = read_raw_rows(path)?;
    let batch = rows_to_batch(path, &rows)?;
    info!(
        records = batch.records.len(),
        columns = batch.columns.len(),
        duplicates = batch.duplicates_dropped,
        "facility file read"
    );
    Ok(batch)
}

/// Read a file into raw cells regardless of format.
pub fn read_raw_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    if !path.is_file() {
        return Err(CourtLinkError::config(format!(
            "input file not found: {}",
            path.display()
        )));
    }
    match InputFormat::from_path(path)? {
        InputFormat::Delimited => delimited::read_rows(path),
        InputFormat::Spreadsheet => spreadsheet::read_rows(path),
    }
}

/// Map raw rows to facility records using the detected header.
pub fn rows_to_batch(source: &Path, rows: &[Vec<String>]) -> Result<FacilityBatch> {
    let header = detect_header(rows)?;
    let mut seen_names = HashSet::new();
    let mut records = Vec::new();
    let mut duplicates_dropped = 0;

    for row in rows.iter().skip(header.row_index + 1) {
        if row.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        let mut record = FacilityRecord::default();
        for (cell, field) in row.iter().zip(&header.columns) {
            if let Some(field) = field {
                record.set_raw(*field, cell);
            }
        }

        if let Some(name) = &record.name {
            if !seen_names.insert(name.to_lowercase()) {
                warn!(facility = %name, "duplicate facility name in input, keeping first row");
                duplicates_dropped += 1;
                continue;
            }
        }
        records.push(record);
    }

    Ok(FacilityBatch {
        source: source.to_path_buf(),
        columns: header.fields(),
        records,
        duplicates_dropped,
    })
}
