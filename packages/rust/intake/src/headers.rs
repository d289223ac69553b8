//! Header detection and column alias resolution.
//!
//! Facility exports change column names between versions ("Name" vs
//! "Facility Name", "Zip" vs "Zip Code") and spreadsheets often carry title
//! rows above the real header.

use courtlink_shared::{CourtLinkError, FacilityField, Result};

/// Rows scanned when looking for the header.
const HEADER_SCAN_ROWS: usize = 10;

/// Accepted spellings per field, already in [`normalize_header`] form.
const ALIASES: &[(FacilityField, &[&str])] = &[
    (FacilityField::Name, &["name", "facility name", "facility"]),
    (
        FacilityField::Address,
        &["address", "street", "street address", "address line 1"],
    ),
    (FacilityField::City, &["city"]),
    (FacilityField::State, &["state", "st"]),
    (
        FacilityField::Zip,
        &["zip", "zip code", "zipcode", "postal code"],
    ),
    (FacilityField::Aor, &["aor", "area of responsibility"]),
    (
        FacilityField::FacilityType,
        &[
            "type detailed",
            "facility type-detailed",
            "facility type detailed",
            "facility type",
            "type",
        ],
    ),
    (
        FacilityField::GenderCapacity,
        &["male/female", "gender/capacity", "gender"],
    ),
    (FacilityField::Mandatory, &["mandatory"]),
    (
        FacilityField::GuaranteedMinimum,
        &["guaranteed minimum", "guaranteed min"],
    ),
    (FacilityField::LastInspectionType, &["last inspection type"]),
    (
        FacilityField::LastInspectionEndDate,
        &["last inspection end date"],
    ),
    (
        FacilityField::PendingFy25Inspection,
        &["pending fy25 inspection"],
    ),
    (
        FacilityField::LastInspectionStandard,
        &["last inspection standard"],
    ),
    (FacilityField::LastFinalRating, &["last final rating"]),
];

/// Lowercase, strip a BOM, turn underscores into spaces and collapse whitespace.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Map one header cell to a facility field.
pub fn resolve_alias(raw: &str) -> Option<FacilityField> {
    let header = normalize_header(raw);
    ALIASES
        .iter()
        .find(|(_, names)| names.contains(&header.as_str()))
        .map(|(field, _)| *field)
}

/// Column layout of a header row.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    /// Index of the header row within the file.
    pub row_index: usize,
    /// Field for each column position; `None` for unknown columns.
    pub columns: Vec<Option<FacilityField>>,
    /// Normalized header text per column, for non-facility lookups.
    pub names: Vec<String>,
}

impl HeaderMap {
    /// Build from a header row. The first column claiming a field wins.
    pub fn from_row(row_index: usize, row: &[String]) -> Self {
        let mut seen = Vec::new();
        let columns = row
            .iter()
            .map(|cell| {
                let field = resolve_alias(cell)?;
                if seen.contains(&field) {
                    return None;
                }
                seen.push(field);
                Some(field)
            })
            .collect();
        Self {
            row_index,
            columns,
            names: row.iter().map(|c| normalize_header(c)).collect(),
        }
    }

    /// Fields present in this file, in column order.
    pub fn fields(&self) -> Vec<FacilityField> {
        self.columns.iter().flatten().copied().collect()
    }

    /// Column position of a raw (non-facility) header such as `latitude`.
    pub fn position(&self, header: &str) -> Option<usize> {
        let wanted = normalize_header(header);
        self.names.iter().position(|n| *n == wanted)
    }

    fn has_name(&self) -> bool {
        self.columns.contains(&Some(FacilityField::Name))
    }
}

/// Locate the header row: the first of the leading rows with a name column
/// and at least one other known column.
pub fn detect_header(rows: &[Vec<String>]) -> Result<HeaderMap> {
    rows.iter()
        .take(HEADER_SCAN_ROWS)
        .enumerate()
        .map(|(i, row)| HeaderMap::from_row(i, row))
        .find(|map| map.has_name() && map.fields().len() >= 2)
        .ok_or_else(|| {
            CourtLinkError::validation(format!(
                "no header row with a facility name column in the first {HEADER_SCAN_ROWS} rows"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn aliases_cover_both_export_versions() {
        assert_eq!(resolve_alias("Facility Name"), Some(FacilityField::Name));
        assert_eq!(resolve_alias("\u{feff}Name"), Some(FacilityField::Name));
        assert_eq!(resolve_alias("Zip Code"), Some(FacilityField::Zip));
        assert_eq!(
            resolve_alias("Facility Type-Detailed"),
            Some(FacilityField::FacilityType)
        );
        assert_eq!(
            resolve_alias("gender/capacity"),
            Some(FacilityField::GenderCapacity)
        );
        assert_eq!(
            resolve_alias("  Last   Final Rating "),
            Some(FacilityField::LastFinalRating)
        );
        assert_eq!(resolve_alias("latitude"), None);
    }

    #[test]
    fn header_found_below_title_rows() {
        let rows = vec![
            row(&["ICE Detention Statistics FY25"]),
            row(&[""]),
            row(&["Facility Name", "Address", "City", "State", "Zip Code"]),
            row(&["Adams County", "20 Hobo Fork Rd", "Natchez", "MS", "39120"]),
        ];
        let header = detect_header(&rows).expect("header");
        assert_eq!(header.row_index, 2);
        assert_eq!(header.fields().len(), 5);
    }

    #[test]
    fn duplicate_header_keeps_first_column() {
        let header = HeaderMap::from_row(0, &row(&["Name", "Facility Name", "City"]));
        assert_eq!(header.columns[0], Some(FacilityField::Name));
        assert_eq!(header.columns[1], None);
    }

    #[test]
    fn missing_header_is_validation_error() {
        let rows = vec![row(&["a", "b"]), row(&["1", "2"])];
        let err = detect_header(&rows).unwrap_err();
        assert!(err.to_string().contains("facility name column"));
    }
}
