//! Geocoded cache files.
//!
//! A cache file is a facility CSV with geocode columns appended. It is both
//! the output of `courtlink geocode` and the input of offline imports, where
//! it stands in for every external provider.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use courtlink_shared::{CourtLinkError, FacilityField, FacilityRecord, Result, clean_text};
use serde::Serialize;
use tracing::debug;

use crate::headers::detect_header;

/// Source value written when every provider failed.
pub const FAILED_SOURCE: &str = "Failed";

/// Geocode columns, in file order.
const GEOCODE_HEADERS: [&str; 6] = [
    "latitude",
    "longitude",
    "normalized_address",
    "geocoding_source",
    "county",
    "geocoding_timestamp",
];

/// Case-insensitive lookup key for a (street, city, state) query.
pub fn query_key(street: &str, city: &str, state: &str) -> String {
    [street, city, state]
        .iter()
        .map(|part| part.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join(", ")
        .to_lowercase()
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Geocode outcome for one cache row.
#[derive(Debug, Clone)]
pub struct GeocodeColumns {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub normalized_address: Option<String>,
    /// Provider label, or [`FAILED_SOURCE`].
    pub source: String,
    pub county: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl GeocodeColumns {
    /// Marker row for a geocode that no provider could satisfy.
    pub fn failed() -> Self {
        Self {
            latitude: None,
            longitude: None,
            normalized_address: None,
            source: FAILED_SOURCE.into(),
            county: None,
            timestamp: Utc::now(),
        }
    }
}

/// Streams facility rows plus geocode columns to a CSV file.
pub struct CacheWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl CacheWriter {
    /// Create (or truncate) `path` and write the header row.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CourtLinkError::io(parent, e))?;
        }
        let mut writer =
            csv::Writer::from_path(path).map_err(|e| CourtLinkError::io(path, e.into()))?;

        let header = FacilityField::ALL
            .iter()
            .map(|f| f.header())
            .chain(GEOCODE_HEADERS);
        writer
            .write_record(header)
            .map_err(|e| CourtLinkError::io(path, e.into()))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    /// Append one facility. `None` leaves the geocode columns blank
    /// (the row was never sent to a provider).
    pub fn write(
        &mut self,
        record: &FacilityRecord,
        geocode: Option<&GeocodeColumns>,
    ) -> Result<()> {
        let mut cells: Vec<String> = FacilityField::ALL
            .iter()
            .map(|f| record.value(*f).display())
            .collect();

        match geocode {
            Some(g) => cells.extend([
                g.latitude.map(|v| v.to_string()).unwrap_or_default(),
                g.longitude.map(|v| v.to_string()).unwrap_or_default(),
                g.normalized_address.clone().unwrap_or_default(),
                g.source.clone(),
                g.county.clone().unwrap_or_default(),
                g.timestamp.to_rfc3339(),
            ]),
            None => cells.extend(std::iter::repeat_n(String::new(), GEOCODE_HEADERS.len())),
        }

        self.writer
            .write_record(&cells)
            .map_err(|e| CourtLinkError::io(&self.path, e.into()))?;
        self.rows += 1;
        Ok(())
    }

    /// Flush to disk and return the number of rows written.
    pub fn finish(mut self) -> Result<usize> {
        self.writer
            .flush()
            .map_err(|e| CourtLinkError::io(&self.path, e))?;
        Ok(self.rows)
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// A usable cache entry: a row with valid coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedGeocode {
    pub query_key: String,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub normalized_address: Option<String>,
    pub source: Option<String>,
    pub county: Option<String>,
    pub timestamp: Option<String>,
}

/// Load every row with usable coordinates from a cache file.
///
/// Rows marked [`FAILED_SOURCE`], rows without coordinates and rows missing
/// an address component are ignored.
pub fn read_cache(path: &Path) -> Result<Vec<CachedGeocode>> {
    let rows = crate::read_raw_rows(path)?;
    let header = detect_header(&rows)?;

    let lat_col = header.position("latitude");
    let lon_col = header.position("longitude");
    let (Some(lat_col), Some(lon_col)) = (lat_col, lon_col) else {
        return Err(CourtLinkError::validation(format!(
            "{} is not a geocoded cache file: latitude/longitude columns missing",
            path.display()
        )));
    };
    let label_col = header.position("normalized_address");
    let source_col = header.position("geocoding_source");
    let county_col = header.position("county");
    let ts_col = header.position("geocoding_timestamp");
    let field_col = |field: FacilityField| header.columns.iter().position(|c| *c == Some(field));
    let (name_col, street_col, city_col, state_col) = (
        field_col(FacilityField::Name),
        field_col(FacilityField::Address),
        field_col(FacilityField::City),
        field_col(FacilityField::State),
    );

    let cell = |row: &[String], col: Option<usize>| -> Option<String> {
        col.and_then(|i| row.get(i)).and_then(|c| clean_text(c))
    };

    let mut entries = Vec::new();
    for row in rows.iter().skip(header.row_index + 1) {
        let source = cell(row, source_col);
        if source.as_deref() == Some(FAILED_SOURCE) {
            continue;
        }
        let coords = (
            cell(row, Some(lat_col)).and_then(|v| v.parse::<f64>().ok()),
            cell(row, Some(lon_col)).and_then(|v| v.parse::<f64>().ok()),
        );
        let (Some(latitude), Some(longitude)) = coords else {
            continue;
        };
        let (Some(street), Some(city), Some(state)) = (
            cell(row, street_col),
            cell(row, city_col),
            cell(row, state_col),
        ) else {
            continue;
        };

        entries.push(CachedGeocode {
            query_key: query_key(&street, &city, &state),
            name: cell(row, name_col),
            latitude,
            longitude,
            normalized_address: cell(row, label_col),
            source,
            county: cell(row, county_col),
            timestamp: cell(row, ts_col),
        });
    }

    debug!(path = %path.display(), entries = entries.len(), "geocode cache loaded");
    Ok(entries)
}
