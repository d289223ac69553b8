//! Delimited text files (CSV, TSV, semicolon or pipe separated).

use std::path::Path;

use courtlink_shared::{CourtLinkError, Result};
use csv::ReaderBuilder;

/// Candidate separators, in tie-break order.
const DELIMITERS: [u8; 4] = [b',', b'\t', b';', b'|'];

/// Read every row of a delimited file as raw cells.
pub(crate) fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let bytes = std::fs::read(path).map_err(|e| CourtLinkError::io(path, e))?;
    // Government exports are not always UTF-8; keep going with replacement chars.
    let content = String::from_utf8_lossy(&bytes);
    parse_rows(&content)
}

/// Parse delimited text, sniffing the separator from the first non-blank line.
pub(crate) fn parse_rows(content: &str) -> Result<Vec<Vec<String>>> {
    let delimiter = sniff_delimiter(content);
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CourtLinkError::parse(format!("row {}: {e}", i + 1)))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// Pick the separator that occurs most often outside quotes on the first line.
fn sniff_delimiter(content: &str) -> u8 {
    let Some(line) = content.lines().find(|l| !l.trim().is_empty()) else {
        return b',';
    };

    let mut counts = [0usize; DELIMITERS.len()];
    let mut in_quotes = false;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if !in_quotes {
            if let Some(i) = DELIMITERS.iter().position(|d| *d == b) {
                counts[i] += 1;
            }
        }
    }

    let (best, count) = counts
        .iter()
        .enumerate()
        .fold((0, 0), |acc, (i, c)| if *c > acc.1 { (i, *c) } else { acc });
    if count == 0 { b',' } else { DELIMITERS[best] }
}
