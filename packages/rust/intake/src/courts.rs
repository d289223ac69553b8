//! Court and court-county CSVs produced by the court scraper.

use std::path::Path;

use courtlink_shared::{CourtLinkError, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// One row of the courts CSV.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CourtRow {
    #[serde(rename = "court", alias = "name")]
    pub name: String,
    pub abbreviation: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// One row of the court-counties CSV.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CourtCountyRow {
    pub court_abbreviation: String,
    #[serde(alias = "county")]
    pub county_name: String,
    pub state: String,
}

/// Rows parsed from a CSV plus how many were rejected.
#[derive(Debug, Clone)]
pub struct CsvLoad<T> {
    pub rows: Vec<T>,
    pub rejected: usize,
}

pub fn read_courts(path: &Path) -> Result<CsvLoad<CourtRow>> {
    let mut load: CsvLoad<CourtRow> = read_typed(path)?;
    for row in &mut load.rows {
        row.name = row.name.trim().to_string();
        row.abbreviation = row.abbreviation.trim().to_lowercase();
        row.url = row.url.take().filter(|u| !u.trim().is_empty());
    }
    Ok(load)
}

pub fn read_court_counties(path: &Path) -> Result<CsvLoad<CourtCountyRow>> {
    let mut load: CsvLoad<CourtCountyRow> = read_typed(path)?;
    for row in &mut load.rows {
        row.court_abbreviation = row.court_abbreviation.trim().to_lowercase();
        row.county_name = row.county_name.trim().to_string();
        row.state = row.state.trim().to_uppercase();
    }
    Ok(load)
}

/// Deserialize every row, logging and counting the ones that do not fit.
fn read_typed<T: DeserializeOwned>(path: &Path) -> Result<CsvLoad<T>> {
    if !path.is_file() {
        return Err(CourtLinkError::config(format!(
            "input file not found: {}",
            path.display()
        )));
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| CourtLinkError::io(path, e.into()))?;

    let mut rows = Vec::new();
    let mut rejected = 0;
    for (i, result) in reader.deserialize::<T>().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!(path = %path.display(), line = i + 2, error = %e, "skipping malformed row");
                rejected += 1;
            }
        }
    }
    Ok(CsvLoad { rows, rejected })
}
