//! Shared types, error model, and configuration for courtlink.
//!
//! This crate is the foundation depended on by all other courtlink crates.
//! It provides:
//! - [`CourtLinkError`], the unified error type
//! - Domain types ([`FacilityRecord`], [`Facility`], [`NormalizedAddress`],
//!   [`Court`], [`RecordState`])
//! - Configuration ([`AppConfig`], [`GeocodingConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, GeocodingConfig, GeocodingSection, VerificationConfig,
    config_dir, config_file_path, database_path, init_config, load_config, load_config_from,
    secondary_api_key, secondary_api_key_with,
};
pub use error::{CourtLinkError, Result};
pub use types::{
    AddressFields, Court, CourtCounty, Facility, FacilityField, FacilityRecord, FieldValue,
    NewNormalizedAddress, NormalizedAddress, ProviderKind, RecordState, clean_text, parse_count,
};
