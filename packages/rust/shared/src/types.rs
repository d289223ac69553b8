//! Core domain types: facilities, normalized addresses, courts, record states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Facility fields
// ---------------------------------------------------------------------------

/// Every scalar facility attribute carried by an input file.
///
/// `Name` is the natural key; the rest are diffed on re-import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacilityField {
    Name,
    Address,
    City,
    State,
    Zip,
    Aor,
    FacilityType,
    GenderCapacity,
    Mandatory,
    GuaranteedMinimum,
    LastInspectionType,
    LastInspectionEndDate,
    PendingFy25Inspection,
    LastInspectionStandard,
    LastFinalRating,
}

impl FacilityField {
    /// All fields in storage column order.
    pub const ALL: [FacilityField; 15] = [
        Self::Name,
        Self::Address,
        Self::City,
        Self::State,
        Self::Zip,
        Self::Aor,
        Self::FacilityType,
        Self::GenderCapacity,
        Self::Mandatory,
        Self::GuaranteedMinimum,
        Self::LastInspectionType,
        Self::LastInspectionEndDate,
        Self::PendingFy25Inspection,
        Self::LastInspectionStandard,
        Self::LastFinalRating,
    ];

    /// Column name in the `facilities` table.
    pub fn column(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Address => "original_address",
            Self::City => "city",
            Self::State => "state",
            Self::Zip => "zip_code",
            Self::Aor => "aor",
            Self::FacilityType => "facility_type",
            Self::GenderCapacity => "gender_capacity",
            Self::Mandatory => "mandatory",
            Self::GuaranteedMinimum => "guaranteed_minimum",
            Self::LastInspectionType => "last_inspection_type",
            Self::LastInspectionEndDate => "last_inspection_end_date",
            Self::PendingFy25Inspection => "pending_fy25_inspection",
            Self::LastInspectionStandard => "last_inspection_standard",
            Self::LastFinalRating => "last_final_rating",
        }
    }

    /// Header written to geocoded cache files.
    pub fn header(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Address => "Address",
            Self::City => "City",
            Self::State => "State",
            Self::Zip => "Zip",
            Self::Aor => "AOR",
            Self::FacilityType => "Type Detailed",
            Self::GenderCapacity => "Male/Female",
            Self::Mandatory => "Mandatory",
            Self::GuaranteedMinimum => "Guaranteed Minimum",
            Self::LastInspectionType => "Last Inspection Type",
            Self::LastInspectionEndDate => "Last Inspection End Date",
            Self::PendingFy25Inspection => "Pending FY25 Inspection",
            Self::LastInspectionStandard => "Last Inspection Standard",
            Self::LastFinalRating => "Last Final Rating",
        }
    }

    /// Whether the column holds an integer count.
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Mandatory | Self::GuaranteedMinimum)
    }
}

/// A single scalar facility value, typed by column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(Option<String>),
    Integer(Option<i64>),
}

impl FieldValue {
    /// Render for cache files and logs; nulls become empty strings.
    pub fn display(&self) -> String {
        match self {
            Self::Text(v) => v.clone().unwrap_or_default(),
            Self::Integer(v) => v.map(|n| n.to_string()).unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// FacilityRecord (input)
// ---------------------------------------------------------------------------

/// One facility row as read from an input file, before persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityRecord {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub aor: Option<String>,
    pub facility_type: Option<String>,
    pub gender_capacity: Option<String>,
    pub mandatory: Option<i64>,
    pub guaranteed_minimum: Option<i64>,
    pub last_inspection_type: Option<String>,
    pub last_inspection_end_date: Option<String>,
    pub pending_fy25_inspection: Option<String>,
    pub last_inspection_standard: Option<String>,
    pub last_final_rating: Option<String>,
}

impl FacilityRecord {
    /// Typed value of `field`.
    pub fn value(&self, field: FacilityField) -> FieldValue {
        use FacilityField as F;
        match field {
            F::Mandatory => FieldValue::Integer(self.mandatory),
            F::GuaranteedMinimum => FieldValue::Integer(self.guaranteed_minimum),
            F::Name => FieldValue::Text(self.name.clone()),
            F::Address => FieldValue::Text(self.address.clone()),
            F::City => FieldValue::Text(self.city.clone()),
            F::State => FieldValue::Text(self.state.clone()),
            F::Zip => FieldValue::Text(self.zip.clone()),
            F::Aor => FieldValue::Text(self.aor.clone()),
            F::FacilityType => FieldValue::Text(self.facility_type.clone()),
            F::GenderCapacity => FieldValue::Text(self.gender_capacity.clone()),
            F::LastInspectionType => FieldValue::Text(self.last_inspection_type.clone()),
            F::LastInspectionEndDate => FieldValue::Text(self.last_inspection_end_date.clone()),
            F::PendingFy25Inspection => FieldValue::Text(self.pending_fy25_inspection.clone()),
            F::LastInspectionStandard => FieldValue::Text(self.last_inspection_standard.clone()),
            F::LastFinalRating => FieldValue::Text(self.last_final_rating.clone()),
        }
    }

    /// Set `field` from a raw cell. Text is trimmed; blanks and `N/A` become null.
    pub fn set_raw(&mut self, field: FacilityField, raw: &str) {
        use FacilityField as F;
        if field.is_integer() {
            let value = parse_count(raw);
            match field {
                F::Mandatory => self.mandatory = value,
                _ => self.guaranteed_minimum = value,
            }
            return;
        }
        let value = clean_text(raw);
        let slot = match field {
            F::Name => &mut self.name,
            F::Address => &mut self.address,
            F::City => &mut self.city,
            F::State => &mut self.state,
            F::Zip => &mut self.zip,
            F::Aor => &mut self.aor,
            F::FacilityType => &mut self.facility_type,
            F::GenderCapacity => &mut self.gender_capacity,
            F::LastInspectionType => &mut self.last_inspection_type,
            F::LastInspectionEndDate => &mut self.last_inspection_end_date,
            F::PendingFy25Inspection => &mut self.pending_fy25_inspection,
            F::LastInspectionStandard => &mut self.last_inspection_standard,
            F::LastFinalRating => &mut self.last_final_rating,
            F::Mandatory | F::GuaranteedMinimum => return,
        };
        *slot = value;
    }

    /// Display name for logs, even when the name column was blank.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// First required field that is missing, if any.
    pub fn missing_required(&self) -> Option<FacilityField> {
        [
            (FacilityField::Name, &self.name),
            (FacilityField::Address, &self.address),
            (FacilityField::City, &self.city),
            (FacilityField::State, &self.state),
        ]
        .into_iter()
        .find(|(_, v)| v.as_deref().is_none_or(|s| s.trim().is_empty()))
        .map(|(f, _)| f)
    }
}

/// Trim a text cell; blanks and `N/A` placeholders are null.
pub fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse a capacity count such as `1,234` or `12.0`.
pub fn parse_count(raw: &str) -> Option<i64> {
    let cleaned: String = clean_text(raw)?.chars().filter(|c| *c != ',').collect();
    if let Ok(n) = cleaned.parse::<i64>() {
        return Some(n);
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| f.round() as i64)
}

// ---------------------------------------------------------------------------
// Facility (stored)
// ---------------------------------------------------------------------------

/// A persisted facility row.
#[derive(Debug, Clone, PartialEq)]
pub struct Facility {
    pub id: i64,
    pub record: FacilityRecord,
    pub normalized_address_id: Option<i64>,
    pub court_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Normalized addresses
// ---------------------------------------------------------------------------

/// Which geocoder produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Nominatim,
    Positionstack,
    Cache,
}

impl ProviderKind {
    /// Source label persisted with each normalized address.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nominatim => "Nominatim/OpenStreetMap",
            Self::Positionstack => "Positionstack",
            Self::Cache => "Cache",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical address fields, identical across providers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressFields {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub county: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Single-line display address as returned by the provider.
    pub label: Option<String>,
}

impl AddressFields {
    /// Both coordinates are present.
    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// A normalized address about to be inserted.
#[derive(Debug, Clone)]
pub struct NewNormalizedAddress {
    pub source: ProviderKind,
    pub query: String,
    pub fields: AddressFields,
    pub raw_payload: serde_json::Value,
}

/// A persisted, immutable normalized address row.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAddress {
    pub id: i64,
    /// Source label, see [`ProviderKind::as_str`].
    pub source: String,
    pub query: String,
    pub fields: AddressFields,
    pub raw_payload: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Courts
// ---------------------------------------------------------------------------

/// A judicial district court.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Court {
    pub id: i64,
    pub name: String,
    pub abbreviation: String,
    pub url: Option<String>,
}

/// A county/state pair under a court's jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourtCounty {
    pub id: i64,
    pub court_id: i64,
    pub county_name: String,
    pub state: String,
}

// ---------------------------------------------------------------------------
// Record state machine
// ---------------------------------------------------------------------------

/// Lifecycle of one facility record through the pipeline.
///
/// `New -> GeocodePending -> (Geocoded | GeocodeFailed)
///  -> (CourtMapped | CourtUnmapped) -> Persisted`, or `New -> Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    New,
    GeocodePending,
    Geocoded,
    GeocodeFailed,
    CourtMapped,
    CourtUnmapped,
    Persisted,
    Skipped,
}

impl RecordState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::GeocodePending => "GEOCODE_PENDING",
            Self::Geocoded => "GEOCODED",
            Self::GeocodeFailed => "GEOCODE_FAILED",
            Self::CourtMapped => "COURT_MAPPED",
            Self::CourtUnmapped => "COURT_UNMAPPED",
            Self::Persisted => "PERSISTED",
            Self::Skipped => "SKIPPED",
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: RecordState) -> bool {
        use RecordState as S;
        matches!(
            (self, next),
            (S::New, S::GeocodePending)
                | (S::New, S::Skipped)
                | (S::New, S::CourtMapped)
                | (S::New, S::CourtUnmapped)
                | (S::New, S::Persisted)
                | (S::GeocodePending, S::Geocoded)
                | (S::GeocodePending, S::GeocodeFailed)
                | (S::Geocoded, S::CourtMapped)
                | (S::Geocoded, S::CourtUnmapped)
                | (S::GeocodeFailed, S::CourtMapped)
                | (S::GeocodeFailed, S::CourtUnmapped)
                | (S::CourtMapped, S::Persisted)
                | (S::CourtUnmapped, S::Persisted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Persisted | Self::Skipped)
    }
}

impl std::fmt::Display for RecordState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
