//! Court and court-county import from the court collaborator's CSVs.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use courtlink_intake::{read_court_counties, read_courts};
use courtlink_shared::Result;
use courtlink_storage::{Storage, UpsertKind};

use crate::pipeline::ProgressReporter;

/// Counters for one court import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CourtImportStats {
    pub courts_inserted: usize,
    pub courts_updated: usize,
    pub courts_unchanged: usize,
    pub courts_rejected: usize,
    pub counties_inserted: usize,
    pub counties_existing: usize,
    /// County rows naming an abbreviation that is not in the store.
    pub counties_unknown_court: usize,
    pub counties_rejected: usize,
}

/// Upsert courts by abbreviation, then attach their counties.
///
/// Missing files are configuration errors; per-row problems are logged and
/// counted.
#[instrument(
    skip_all,
    fields(courts = %courts_path.display(), counties = %counties_path.display())
)]
pub async fn import_courts(
    storage: &Storage,
    courts_path: &Path,
    counties_path: &Path,
    progress: &dyn ProgressReporter,
) -> Result<CourtImportStats> {
    let courts = read_courts(courts_path)?;
    let counties = read_court_counties(counties_path)?;
    let mut stats = CourtImportStats {
        courts_rejected: courts.rejected,
        counties_rejected: counties.rejected,
        ..Default::default()
    };

    // --- Phase 1: Courts ---
    progress.phase("Importing courts");
    let mut ids: HashMap<String, i64> = HashMap::new();
    let total = courts.rows.len();

    for (i, row) in courts.rows.iter().enumerate() {
        progress.record(&row.abbreviation, i + 1, total);
        if row.abbreviation.is_empty() || row.name.is_empty() {
            warn!(line = i + 2, "court row without name or abbreviation");
            stats.courts_rejected += 1;
            continue;
        }
        match storage
            .upsert_court(&row.name, &row.abbreviation, row.url.as_deref())
            .await
        {
            Ok((id, kind)) => {
                ids.insert(row.abbreviation.clone(), id);
                match kind {
                    UpsertKind::Inserted => stats.courts_inserted += 1,
                    UpsertKind::Updated => stats.courts_updated += 1,
                    UpsertKind::Unchanged => stats.courts_unchanged += 1,
                }
            }
            Err(e) => {
                error!(court = %row.abbreviation, error = %e, "court upsert failed");
                stats.courts_rejected += 1;
            }
        }
    }

    // --- Phase 2: Counties ---
    progress.phase("Importing court counties");
    let total = counties.rows.len();

    for (i, row) in counties.rows.iter().enumerate() {
        progress.record(&row.county_name, i + 1, total);
        if row.county_name.is_empty() || row.state.is_empty() {
            warn!(line = i + 2, "county row without county or state");
            stats.counties_rejected += 1;
            continue;
        }

        let court_id = match ids.get(&row.court_abbreviation) {
            Some(id) => Some(*id),
            None => match storage.court_by_abbreviation(&row.court_abbreviation).await {
                Ok(found) => {
                    let id = found.map(|c| c.id);
                    if let Some(id) = id {
                        ids.insert(row.court_abbreviation.clone(), id);
                    }
                    id
                }
                Err(e) => {
                    error!(court = %row.court_abbreviation, error = %e, "court lookup failed");
                    stats.counties_rejected += 1;
                    continue;
                }
            },
        };

        let Some(court_id) = court_id else {
            warn!(
                court = %row.court_abbreviation,
                county = %row.county_name,
                state = %row.state,
                "unknown court abbreviation, skipping county"
            );
            stats.counties_unknown_court += 1;
            continue;
        };

        match storage
            .insert_court_county(court_id, &row.county_name, &row.state)
            .await
        {
            Ok(true) => stats.counties_inserted += 1,
            Ok(false) => stats.counties_existing += 1,
            Err(e) => {
                error!(county = %row.county_name, error = %e, "county insert failed");
                stats.counties_rejected += 1;
            }
        }
    }

    progress.done();
    info!(
        courts_inserted = stats.courts_inserted,
        courts_updated = stats.courts_updated,
        counties_inserted = stats.counties_inserted,
        counties_unknown_court = stats.counties_unknown_court,
        "court import complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::pipeline::SilentProgress;
    use crate::test_support::{fixture, test_storage};

    #[tokio::test]
    async fn imports_fixtures_and_skips_unknown_courts() {
        let storage = test_storage().await;
        let stats = import_courts(
            &storage,
            &fixture("courts.csv"),
            &fixture("court_counties.csv"),
            &SilentProgress,
        )
        .await
        .expect("import");

        assert_eq!(stats.courts_inserted, 3);
        assert_eq!(stats.counties_inserted, 5);
        assert_eq!(stats.counties_unknown_court, 1);
        assert_eq!(storage.count_rows("court_counties").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn reimport_is_a_no_op() {
        let storage = test_storage().await;
        let courts = fixture("courts.csv");
        let counties = fixture("court_counties.csv");
        import_courts(&storage, &courts, &counties, &SilentProgress)
            .await
            .unwrap();

        let stats = import_courts(&storage, &courts, &counties, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(stats.courts_inserted, 0);
        assert_eq!(stats.courts_unchanged, 3);
        assert_eq!(stats.counties_inserted, 0);
        assert_eq!(stats.counties_existing, 5);
    }

    #[tokio::test]
    async fn missing_file_is_config_error() {
        let storage = test_storage().await;
        let err = import_courts(
            &storage,
            &PathBuf::from("does/not/exist.csv"),
            &fixture("court_counties.csv"),
            &SilentProgress,
        )
        .await
        .unwrap_err();
        assert!(err.is_config());
    }
}
