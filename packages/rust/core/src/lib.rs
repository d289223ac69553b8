//! Core pipeline orchestration for courtlink.
//!
//! This crate ties intake, geocoding and storage together into the batch
//! workflows: facility import, court import, geocode cache production and
//! database verification.

pub mod courts;
pub mod geocode;
pub mod matcher;
pub mod pipeline;
pub mod verification;

pub use courts::{CourtImportStats, import_courts};
pub use geocode::{GeocodeCacheStats, build_geocode_cache};
pub use matcher::CountyCourtMatcher;
pub use pipeline::{
    ImportReport, ProgressReporter, RecordOutcome, RecordResult, RunContext, RunStats,
    SilentProgress, UnmatchedCounty, import_facilities,
};
pub use verification::{
    Check, CheckStatus, Coverage, OrphanRow, VerificationMode, VerificationReport, VerifyOptions,
    verify,
};
