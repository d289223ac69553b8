//! Spreadsheet workbooks (XLSX, XLSM, XLS, ODS). Only the first sheet is read.

use std::path::Path;

use calamine::{Data, DataType, Reader, open_workbook_auto};
use courtlink_shared::{CourtLinkError, Result};

pub(crate) fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| CourtLinkError::parse(format!("{}: {e}", path.display())))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| {
            CourtLinkError::validation(format!("{}: workbook has no sheets", path.display()))
        })?
        .map_err(|e| CourtLinkError::parse(format!("{}: {e}", path.display())))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

/// Render one cell the way it would appear in a CSV export.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        // Zip codes and counts arrive as floats.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Int(i) => i.to_string(),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(|dt| dt.date().to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_cells_render_without_fraction() {
        assert_eq!(cell_text(&Data::Float(62701.0)), "62701");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::Int(40)), "40");
        assert_eq!(cell_text(&Data::Empty), "");
        assert_eq!(cell_text(&Data::String("IL".into())), "IL");
    }

    #[test]
    fn unreadable_workbook_is_parse_error() {
        let tmp = std::env::temp_dir().join(format!("cl_test_{}.xlsx", uuid::Uuid::now_v7()));
        std::fs::write(&tmp, b"not a zip archive").expect("write");
        let err = read_rows(&tmp).unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }
}
