//! Address geocoding with an ordered provider fallback chain.
//!
//! Every provider implements [`Geocoder`]. A [`GeocodingChain`] tries them in
//! order, each with its own [`RetryPolicy`], pacing external calls with a
//! fixed delay. The chain never returns an error: callers get a
//! [`GeocodeOutcome`] that is either a match or the list of provider failures.

mod cache;
mod chain;
mod nominatim;
pub mod normalize;
mod positionstack;

use std::time::Duration;

use async_trait::async_trait;
use courtlink_shared::{AddressFields, CourtLinkError, ProviderKind, Result};
use reqwest::Client;

pub use cache::CacheGeocoder;
pub use chain::{GeocodeOutcome, GeocodingChain, RetryPolicy};
pub use nominatim::NominatimGeocoder;
pub use normalize::{normalize, parse_label, state_code};
pub use positionstack::PositionstackGeocoder;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A single geocoding backend.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Which provider this is, for logs and persisted source labels.
    fn kind(&self) -> ProviderKind;

    /// Whether calls leave the process and must be paced.
    fn is_external(&self) -> bool {
        true
    }

    /// Resolve one address. Only the first candidate is considered.
    async fn geocode(
        &self,
        street: &str,
        city: &str,
        state: &str,
    ) -> std::result::Result<GeocodeMatch, GeocodeError>;
}

/// A successful geocode.
#[derive(Debug, Clone)]
pub struct GeocodeMatch {
    pub source: ProviderKind,
    /// Query string as sent to the provider.
    pub query: String,
    pub address: AddressFields,
    /// First candidate exactly as returned.
    pub raw_payload: serde_json::Value,
}

impl GeocodeMatch {
    /// Build from a raw candidate; a candidate without coordinates is no result.
    pub fn from_candidate(
        source: ProviderKind,
        query: String,
        raw_payload: serde_json::Value,
    ) -> std::result::Result<Self, GeocodeError> {
        let address = normalize(source, &raw_payload);
        if !address.has_coordinates() {
            return Err(GeocodeError::NoResult { provider: source });
        }
        Ok(Self {
            source,
            query,
            address,
            raw_payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a provider produced no match.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeocodeError {
    #[error("{provider}: request timed out")]
    Timeout { provider: ProviderKind },

    #[error("{provider}: service error: {message}")]
    Service {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider}: no result")]
    NoResult { provider: ProviderKind },
}

impl GeocodeError {
    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::Timeout { provider }
            | Self::Service { provider, .. }
            | Self::NoResult { provider } => *provider,
        }
    }

    /// Short class name for structured logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Service { .. } => "service_error",
            Self::NoResult { .. } => "empty_result",
        }
    }

    /// Timeouts and service errors may succeed on retry; empty results do not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoResult { .. })
    }

    /// Classify a transport error.
    pub(crate) fn from_reqwest(provider: ProviderKind, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { provider }
        } else {
            Self::Service {
                provider,
                message: err.to_string(),
            }
        }
    }
}

/// HTTP client shared by the network providers.
pub(crate) fn build_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| CourtLinkError::Network(format!("failed to build HTTP client: {e}")))
}

/// Parse and join a provider base URL.
pub(crate) fn endpoint(base: &str, path: &str) -> Result<url::Url> {
    let base = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    url::Url::parse(&base)
        .and_then(|u| u.join(path))
        .map_err(|e| CourtLinkError::config(format!("invalid geocoder url '{base}': {e}")))
}
