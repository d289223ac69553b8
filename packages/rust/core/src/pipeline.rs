//! Facility import: upsert → geocode → court mapping, one record at a time.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use courtlink_geocoding::{GeocodeOutcome, GeocodingChain};
use courtlink_intake::FacilityBatch;
use courtlink_shared::{
    AddressFields, CourtLinkError, Facility, FacilityField, FacilityRecord, NewNormalizedAddress,
    ProviderKind, RecordState, Result,
};
use courtlink_storage::{Storage, UpsertKind};

use crate::matcher::CountyCourtMatcher;

/// Running counters for one import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub records_total: usize,
    pub records_added: usize,
    pub records_updated: usize,
    pub records_unchanged: usize,
    pub records_skipped: usize,
    pub records_failed: usize,
    pub addresses_geocoded: usize,
    pub geocode_failures: usize,
    pub courts_mapped: usize,
    pub courts_unmapped: usize,
}

/// What happened to one input record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// Written and committed.
    Persisted {
        facility_id: i64,
        change: UpsertKind,
        trail: Vec<RecordState>,
        /// No provider matched; the facility has no address and is geocoded
        /// again on the next run.
        geocode_failed: bool,
        court_id: Option<i64>,
    },
    /// Required fields missing; nothing was written.
    Skipped { reason: String },
    /// The record's transaction was rolled back.
    Failed { error: String },
}

impl RecordOutcome {
    pub fn final_state(&self) -> Option<RecordState> {
        match self {
            Self::Persisted { trail, .. } => trail.last().copied(),
            Self::Skipped { .. } => Some(RecordState::Skipped),
            Self::Failed { .. } => None,
        }
    }
}

/// A county that resolved to no court.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnmatchedCounty {
    pub facility: String,
    pub county: String,
    pub state: String,
}

/// Outcome of one input record, by facility name.
#[derive(Debug, Clone)]
pub struct RecordResult {
    pub facility: String,
    pub outcome: RecordOutcome,
}

/// Result of [`import_facilities`].
#[derive(Debug)]
pub struct ImportReport {
    pub run_id: String,
    pub source: PathBuf,
    pub stats: RunStats,
    pub records: Vec<RecordResult>,
    /// Counties needing manual follow-up.
    pub unmatched: Vec<UnmatchedCounty>,
    /// Geocoders in fallback order.
    pub providers: Vec<ProviderKind>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before each record is processed.
    fn record(&self, name: &str, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn record(&self, _name: &str, _current: usize, _total: usize) {}
    fn done(&self) {}
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Persistence context for one run: the store, the run id and the counters.
pub struct RunContext<'a> {
    storage: &'a Storage,
    run_id: String,
    stats: RunStats,
    unmatched: Vec<UnmatchedCounty>,
}

impl<'a> RunContext<'a> {
    /// Register a new run in the history table.
    pub async fn start(storage: &'a Storage, command: &str, input: Option<&str>) -> Result<Self> {
        let run_id = storage.insert_run(command, input).await?;
        Ok(Self {
            storage,
            run_id,
            stats: RunStats::default(),
            unmatched: Vec::new(),
        })
    }

    pub fn storage(&self) -> &'a Storage {
        self.storage
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Fold a committed (or skipped/failed) record into the counters.
    fn tally(&mut self, outcome: &RecordOutcome, unmatched: Option<UnmatchedCounty>) {
        self.stats.records_total += 1;
        match outcome {
            RecordOutcome::Persisted {
                change,
                trail,
                geocode_failed,
                ..
            } => {
                match change {
                    UpsertKind::Inserted => self.stats.records_added += 1,
                    UpsertKind::Updated => self.stats.records_updated += 1,
                    UpsertKind::Unchanged => self.stats.records_unchanged += 1,
                }
                if trail.contains(&RecordState::Geocoded) {
                    self.stats.addresses_geocoded += 1;
                }
                if *geocode_failed {
                    self.stats.geocode_failures += 1;
                }
                if trail.contains(&RecordState::CourtUnmapped) {
                    self.stats.courts_unmapped += 1;
                } else if trail.contains(&RecordState::CourtMapped) {
                    self.stats.courts_mapped += 1;
                }
                if let Some(county) = unmatched {
                    self.unmatched.push(county);
                }
            }
            RecordOutcome::Skipped { .. } => self.stats.records_skipped += 1,
            RecordOutcome::Failed { .. } => self.stats.records_failed += 1,
        }
    }

    /// Store the final counters on the run row.
    pub async fn finish(self) -> Result<(String, RunStats, Vec<UnmatchedCounty>)> {
        let json = serde_json::to_string(&self.stats)
            .map_err(|e| CourtLinkError::Storage(format!("stats serialization: {e}")))?;
        self.storage.finish_run(&self.run_id, &json).await?;
        Ok((self.run_id, self.stats, self.unmatched))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Import every record of `batch`.
///
/// Records are processed strictly in order, each in its own transaction.
/// Only store-level failures outside a record (run bookkeeping) are errors.
#[instrument(skip_all, fields(source = %batch.source.display(), records = batch.records.len()))]
pub async fn import_facilities(
    storage: &Storage,
    batch: &FacilityBatch,
    chain: &GeocodingChain,
    progress: &dyn ProgressReporter,
) -> Result<ImportReport> {
    let start = Instant::now();
    let source = batch.source.display().to_string();
    let mut ctx = RunContext::start(storage, "import", Some(source.as_str())).await?;
    let matcher = CountyCourtMatcher::new(storage);

    info!(run_id = %ctx.run_id(), providers = ?chain.providers(), "starting facility import");

    // --- Phase 1: Records ---
    progress.phase("Importing facilities");
    let total = batch.records.len();
    let mut records = Vec::with_capacity(total);

    for (i, record) in batch.records.iter().enumerate() {
        progress.record(record.label(), i + 1, total);
        let (outcome, unmatched) =
            process_record(&ctx, record, &batch.columns, chain, &matcher).await;
        ctx.tally(&outcome, unmatched);
        records.push(RecordResult {
            facility: record.label().to_string(),
            outcome,
        });
    }

    // --- Phase 2: Run history ---
    progress.phase("Recording run");
    let (run_id, stats, unmatched) = ctx.finish().await?;

    let report = ImportReport {
        run_id,
        source: batch.source.clone(),
        stats,
        records,
        unmatched,
        providers: chain.providers(),
        elapsed: start.elapsed(),
    };
    progress.done();

    info!(
        added = report.stats.records_added,
        updated = report.stats.records_updated,
        unchanged = report.stats.records_unchanged,
        skipped = report.stats.records_skipped,
        failed = report.stats.records_failed,
        geocoded = report.stats.addresses_geocoded,
        courts_mapped = report.stats.courts_mapped,
        elapsed_ms = report.elapsed.as_millis(),
        "facility import complete"
    );

    Ok(report)
}

/// Run one record through the state machine inside its own transaction.
async fn process_record(
    ctx: &RunContext<'_>,
    record: &FacilityRecord,
    columns: &[FacilityField],
    chain: &GeocodingChain,
    matcher: &CountyCourtMatcher<'_>,
) -> (RecordOutcome, Option<UnmatchedCounty>) {
    let mut trail = StateTrail::new();

    if let Some(field) = record.missing_required() {
        trail.advance(RecordState::Skipped);
        info!(facility = %record.label(), missing = field.header(), "skipping incomplete record");
        let reason = format!("missing {}", field.header());
        return (RecordOutcome::Skipped { reason }, None);
    }

    let storage = ctx.storage();
    let tx = match storage.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!(facility = %record.label(), error = %e, "could not start record transaction");
            return (RecordOutcome::Failed { error: e.to_string() }, None);
        }
    };

    match write_record(storage, record, columns, chain, matcher, &mut trail).await {
        Ok(written) => match tx.commit().await {
            Ok(()) => {
                debug!(facility = %record.label(), trail = ?trail.states, "record persisted");
                let outcome = RecordOutcome::Persisted {
                    facility_id: written.facility_id,
                    change: written.change,
                    trail: trail.states,
                    geocode_failed: written.geocode_failed,
                    court_id: written.court_id,
                };
                (outcome, written.unmatched)
            }
            Err(e) => {
                error!(
                    facility = %record.label(),
                    error = %e,
                    "commit failed, record rolled back"
                );
                (RecordOutcome::Failed { error: e.to_string() }, None)
            }
        },
        Err(e) => {
            error!(facility = %record.label(), error = %e, "record failed, rolling back");
            if let Err(rb) = tx.rollback().await {
                error!(facility = %record.label(), error = %rb, "rollback failed");
            }
            (RecordOutcome::Failed { error: e.to_string() }, None)
        }
    }
}

/// What [`write_record`] did, before commit.
struct WrittenRecord {
    facility_id: i64,
    change: UpsertKind,
    geocode_failed: bool,
    court_id: Option<i64>,
    unmatched: Option<UnmatchedCounty>,
}

async fn write_record(
    storage: &Storage,
    record: &FacilityRecord,
    columns: &[FacilityField],
    chain: &GeocodingChain,
    matcher: &CountyCourtMatcher<'_>,
    trail: &mut StateTrail,
) -> Result<WrittenRecord> {
    let name = record.label();

    // Field upsert keyed on name; the id exists before any address row.
    let (facility, change) = upsert_facility(storage, record, columns).await?;
    let facility_id = facility.id;

    let mut address = match facility.normalized_address_id {
        Some(address_id) => match storage.get_normalized_address(address_id).await? {
            Some(stored) => Some(stored.fields),
            None => {
                warn!(
                    facility = %name,
                    address_id,
                    "facility references a missing address, geocoding again"
                );
                storage.set_facility_address(facility_id, None).await?;
                None
            }
        },
        None => None,
    };

    let mut geocode_failed = false;
    if address.is_none() {
        trail.advance(RecordState::GeocodePending);
        address = geocode_record(storage, facility_id, record, chain).await?;
        if address.is_some() {
            trail.advance(RecordState::Geocoded);
        } else {
            trail.advance(RecordState::GeocodeFailed);
            geocode_failed = true;
        }
    }

    let mut court_id = facility.court_id;
    let mut unmatched = None;

    match court_id {
        Some(_) if trail.current() == RecordState::New => {
            debug!(facility = %name, "facility already geocoded and mapped");
        }
        Some(_) => trail.advance(RecordState::CourtMapped),
        None => {
            let located = address.as_ref().and_then(|a| {
                a.county
                    .as_deref()
                    .zip(a.state.as_deref())
                    .filter(|(county, state)| !county.trim().is_empty() && !state.trim().is_empty())
            });
            match located {
                Some((county, state)) => match matcher.find(county, state).await {
                    Some(court) => {
                        storage.set_facility_court(facility_id, court.id).await?;
                        info!(
                            facility = %name,
                            court = %court.abbreviation,
                            "facility mapped to court"
                        );
                        court_id = Some(court.id);
                        trail.advance(RecordState::CourtMapped);
                    }
                    None => {
                        unmatched = Some(UnmatchedCounty {
                            facility: name.to_string(),
                            county: county.to_string(),
                            state: state.to_string(),
                        });
                        trail.advance(RecordState::CourtUnmapped);
                    }
                },
                None => {
                    if address.is_some() {
                        debug!(facility = %name, "address has no county, court left unset");
                    }
                    trail.advance(RecordState::CourtUnmapped);
                }
            }
        }
    }

    trail.advance(RecordState::Persisted);
    debug_assert!(trail.current().is_terminal());
    Ok(WrittenRecord {
        facility_id,
        change,
        geocode_failed,
        court_id,
        unmatched,
    })
}

/// Insert a new facility, or update only the changed columns of an existing one.
async fn upsert_facility(
    storage: &Storage,
    record: &FacilityRecord,
    columns: &[FacilityField],
) -> Result<(Facility, UpsertKind)> {
    let name = record
        .name
        .as_deref()
        .ok_or_else(|| CourtLinkError::validation("facility name is required"))?;

    if let Some(existing) = storage.get_facility_by_name(name).await? {
        let changes: Vec<_> = columns
            .iter()
            .filter_map(|field| {
                let incoming = record.value(*field);
                (incoming != existing.record.value(*field)).then_some((*field, incoming))
            })
            .collect();

        if changes.is_empty() {
            return Ok((existing, UpsertKind::Unchanged));
        }

        debug!(
            facility = %name,
            fields = ?changes.iter().map(|(f, _)| f.column()).collect::<Vec<_>>(),
            "updating changed fields"
        );
        storage.update_facility_fields(existing.id, &changes).await?;
        return Ok((existing, UpsertKind::Updated));
    }

    let id = storage.insert_facility(record).await?;
    let facility = Facility {
        id,
        record: record.clone(),
        normalized_address_id: None,
        court_id: None,
    };
    Ok((facility, UpsertKind::Inserted))
}

/// Geocode the record's address and link the snapshot. `None` when every
/// provider failed.
async fn geocode_record(
    storage: &Storage,
    facility_id: i64,
    record: &FacilityRecord,
    chain: &GeocodingChain,
) -> Result<Option<AddressFields>> {
    let street = record.address.as_deref().unwrap_or_default();
    let city = record.city.as_deref().unwrap_or_default();
    let state = record.state.as_deref().unwrap_or_default();

    match chain.geocode(street, city, state).await {
        GeocodeOutcome::Matched(found) => {
            let snapshot = NewNormalizedAddress {
                source: found.source,
                query: found.query,
                fields: found.address,
                raw_payload: found.raw_payload,
            };
            let address_id = storage.insert_normalized_address(&snapshot).await?;
            storage
                .set_facility_address(facility_id, Some(address_id))
                .await?;
            info!(
                facility = %record.label(),
                provider = %snapshot.source,
                county = snapshot.fields.county.as_deref().unwrap_or(""),
                "address geocoded"
            );
            Ok(Some(snapshot.fields))
        }
        GeocodeOutcome::Failed { failures } => {
            warn!(
                facility = %record.label(),
                attempts = failures.len(),
                last_error = failures.last().map(|e| e.as_str()).unwrap_or("no providers"),
                "geocoding failed, will retry on next run"
            );
            Ok(None)
        }
    }
}

// ---------------------------------------------------------------------------
// State trail
// ---------------------------------------------------------------------------

/// Visited states of one record, starting at `New`.
struct StateTrail {
    states: Vec<RecordState>,
}

impl StateTrail {
    fn new() -> Self {
        Self {
            states: vec![RecordState::New],
        }
    }

    fn current(&self) -> RecordState {
        self.states.last().copied().unwrap_or(RecordState::New)
    }

    fn advance(&mut self, next: RecordState) {
        debug_assert!(
            self.current().can_transition_to(next),
            "illegal transition {} -> {next}",
            self.current()
        );
        self.states.push(next);
    }
}
