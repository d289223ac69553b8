//! Read-only database verification.
//!
//! Checks run in three levels of strictness. Every check produces a
//! [`Check`] with a status; the report passes when no check failed.

use serde::Serialize;
use tracing::{info, instrument, warn};

use courtlink_shared::{CourtCounty, Result};
use courtlink_storage::{AUDITED_TABLES, Storage};

/// How much to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Tables exist.
    SchemaOnly,
    /// Core tables are populated, no orphans, coverage reported.
    BasicData,
    /// Everything, including normalized addresses and facility links.
    FullCheck,
}

impl VerificationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SchemaOnly => "schema_only",
            Self::BasicData => "basic_data",
            Self::FullCheck => "full_check",
        }
    }
}

impl std::fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

/// Courts that have at least one county.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coverage {
    pub covered: i64,
    pub total: i64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub mode: VerificationMode,
    pub checks: Vec<Check>,
    pub table_counts: Vec<(String, i64)>,
    pub orphans: Vec<OrphanRow>,
    pub coverage: Option<Coverage>,
    pub passed: bool,
}

/// A county row pointing at a missing court.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanRow {
    pub id: i64,
    pub court_id: i64,
    pub county_name: String,
    pub state: String,
}

impl From<CourtCounty> for OrphanRow {
    fn from(row: CourtCounty) -> Self {
        Self {
            id: row.id,
            court_id: row.court_id,
            county_name: row.county_name,
            state: row.state,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub mode: VerificationMode,
    /// Without a secondary key an empty `normalized_addresses` only warns.
    pub secondary_key_configured: bool,
    pub coverage_warn_pct: f64,
}

impl VerifyOptions {
    pub fn new(mode: VerificationMode) -> Self {
        Self {
            mode,
            secondary_key_configured: false,
            coverage_warn_pct: 80.0,
        }
    }
}

/// Run the checks for `options.mode`. Never writes.
#[instrument(skip_all, fields(mode = %options.mode))]
pub async fn verify(storage: &Storage, options: &VerifyOptions) -> Result<VerificationReport> {
    let mut report = VerificationReport {
        mode: options.mode,
        checks: Vec::new(),
        table_counts: Vec::new(),
        orphans: Vec::new(),
        coverage: None,
        passed: false,
    };

    // --- Schema ---
    let tables = storage.list_tables().await?;
    let mut schema_ok = true;
    for table in AUDITED_TABLES {
        let exists = tables.iter().any(|t| t == table);
        schema_ok &= exists;
        report.push(
            format!("table {table} exists"),
            if exists { CheckStatus::Pass } else { CheckStatus::Fail },
            if exists { "present" } else { "missing" },
        );
    }

    if options.mode != VerificationMode::SchemaOnly && schema_ok {
        // --- Row counts ---
        for table in AUDITED_TABLES {
            let count = storage.count_rows(table).await?;
            report.table_counts.push((table.to_string(), count));

            let status = match (table, count) {
                (_, n) if n > 0 => CheckStatus::Pass,
                ("normalized_addresses", _) if options.mode == VerificationMode::BasicData => {
                    continue;
                }
                ("normalized_addresses", _) if !options.secondary_key_configured => {
                    CheckStatus::Warn
                }
                _ => CheckStatus::Fail,
            };
            let detail = match status {
                CheckStatus::Warn => format!("{count} rows (no secondary geocoder key configured)"),
                _ => format!("{count} rows"),
            };
            report.push(format!("table {table} populated"), status, detail);
        }

        // --- Orphans ---
        report.orphans = storage
            .orphaned_court_counties()
            .await?
            .into_iter()
            .map(OrphanRow::from)
            .collect();
        let orphan_status = if report.orphans.is_empty() {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        };
        let detail = format!("{} county rows reference no court", report.orphans.len());
        report.push("court_counties reference courts", orphan_status, detail);

        // --- Coverage ---
        let (covered, total) = storage.court_coverage().await?;
        if total > 0 {
            let percent = covered as f64 * 100.0 / total as f64;
            let status = if percent < options.coverage_warn_pct {
                CheckStatus::Warn
            } else {
                CheckStatus::Pass
            };
            report.coverage = Some(Coverage {
                covered,
                total,
                percent,
            });
            report.push(
                "court county coverage",
                status,
                format!("{covered}/{total} courts have counties ({percent:.1}%)"),
            );
        } else {
            report.push("court county coverage", CheckStatus::Warn, "no courts loaded");
        }
    }

    if options.mode == VerificationMode::FullCheck && schema_ok {
        // --- Facility links ---
        let links = storage.facility_links().await?;
        let dangling = links.dangling_address_refs + links.dangling_court_refs;
        report.push(
            "facility references resolve",
            if dangling == 0 { CheckStatus::Pass } else { CheckStatus::Fail },
            format!(
                "{} dangling address refs, {} dangling court refs",
                links.dangling_address_refs, links.dangling_court_refs
            ),
        );
        report.push(
            "linked addresses have coordinates",
            if links.addresses_without_coordinates == 0 {
                CheckStatus::Pass
            } else {
                CheckStatus::Fail
            },
            format!("{} without coordinates", links.addresses_without_coordinates),
        );
        report.push(
            "facilities mapped to courts",
            CheckStatus::Pass,
            format!(
                "{}/{} with address, {}/{} with court",
                links.with_address, links.total, links.with_court, links.total
            ),
        );
    }

    report.passed = report.checks.iter().all(|c| c.status != CheckStatus::Fail);

    for check in report.checks.iter().filter(|c| c.status != CheckStatus::Pass) {
        warn!(
            check = %check.name,
            status = ?check.status,
            detail = %check.detail,
            "verification check"
        );
    }
    info!(passed = report.passed, checks = report.checks.len(), "verification complete");

    Ok(report)
}

impl VerificationReport {
    fn push(&mut self, name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) {
        self.checks.push(Check {
            name: name.into(),
            status,
            detail: detail.into(),
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.status == CheckStatus::Fail)
    }
}
