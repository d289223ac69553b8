//! Geocode a facility file into a cache CSV for later offline imports.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use courtlink_geocoding::{GeocodeOutcome, GeocodingChain};
use courtlink_intake::{CacheWriter, FacilityBatch, GeocodeColumns};
use courtlink_shared::Result;

use crate::pipeline::ProgressReporter;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeocodeCacheStats {
    pub rows_written: usize,
    pub geocoded: usize,
    pub failed: usize,
    /// Rows missing street, city or state; never sent to a provider.
    pub incomplete: usize,
}

/// Run every complete address through `chain` and write the cache to `out`.
#[instrument(skip_all, fields(source = %batch.source.display(), out = %out.display()))]
pub async fn build_geocode_cache(
    batch: &FacilityBatch,
    chain: &GeocodingChain,
    out: &Path,
    progress: &dyn ProgressReporter,
) -> Result<GeocodeCacheStats> {
    let mut writer = CacheWriter::create(out)?;
    let mut stats = GeocodeCacheStats::default();

    progress.phase("Geocoding facilities");
    let total = batch.records.len();

    for (i, record) in batch.records.iter().enumerate() {
        progress.record(record.label(), i + 1, total);

        let (Some(street), Some(city), Some(state)) = (
            record.address.as_deref(),
            record.city.as_deref(),
            record.state.as_deref(),
        ) else {
            warn!(facility = %record.label(), "address incomplete, not geocoded");
            writer.write(record, None)?;
            stats.incomplete += 1;
            continue;
        };

        let columns = match chain.geocode(street, city, state).await {
            GeocodeOutcome::Matched(found) => {
                stats.geocoded += 1;
                GeocodeColumns {
                    latitude: found.address.latitude,
                    longitude: found.address.longitude,
                    normalized_address: found.address.label.clone(),
                    source: found.source.as_str().to_string(),
                    county: found.address.county.clone(),
                    timestamp: Utc::now(),
                }
            }
            GeocodeOutcome::Failed { .. } => {
                warn!(facility = %record.label(), "geocoding failed");
                stats.failed += 1;
                GeocodeColumns::failed()
            }
        };
        writer.write(record, Some(&columns))?;
    }

    stats.rows_written = writer.finish()?;
    progress.done();

    info!(
        rows = stats.rows_written,
        geocoded = stats.geocoded,
        failed = stats.failed,
        incomplete = stats.incomplete,
        "geocode cache written"
    );
    Ok(stats)
}
