//! Offline geocoder backed by a previously written cache file.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use courtlink_intake::{CachedGeocode, query_key, read_cache};
use courtlink_shared::{ProviderKind, Result};
use tracing::info;

use crate::{GeocodeError, GeocodeMatch, Geocoder};

const KIND: ProviderKind = ProviderKind::Cache;

/// Looks addresses up in a cache file instead of calling a provider.
pub struct CacheGeocoder {
    entries: HashMap<String, CachedGeocode>,
}

impl CacheGeocoder {
    /// Load a cache file written by `courtlink geocode`.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = read_cache(path)?;
        info!(path = %path.display(), entries = entries.len(), "loaded geocode cache");
        Ok(Self::from_entries(entries))
    }

    /// The first entry per query wins.
    pub fn from_entries(entries: impl IntoIterator<Item = CachedGeocode>) -> Self {
        let mut map = HashMap::new();
        for entry in entries {
            map.entry(entry.query_key.clone()).or_insert(entry);
        }
        Self { entries: map }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Geocoder for CacheGeocoder {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn is_external(&self) -> bool {
        false
    }

    async fn geocode(
        &self,
        street: &str,
        city: &str,
        state: &str,
    ) -> std::result::Result<GeocodeMatch, GeocodeError> {
        let key = query_key(street, city, state);
        let entry = self
            .entries
            .get(&key)
            .ok_or(GeocodeError::NoResult { provider: KIND })?;
        let raw = serde_json::to_value(entry).map_err(|e| GeocodeError::Service {
            provider: KIND,
            message: e.to_string(),
        })?;
        GeocodeMatch::from_candidate(KIND, key, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, county: Option<&str>) -> CachedGeocode {
        CachedGeocode {
            query_key: key.into(),
            name: Some("Sangamon County Detention Center".into()),
            latitude: 39.8017,
            longitude: -89.6437,
            normalized_address: Some("1 Sheriffs Plaza, Springfield, IL 62701, USA".into()),
            source: Some("Positionstack".into()),
            county: county.map(String::from),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let cache = CacheGeocoder::from_entries([entry(
            "1 sheriffs plaza, springfield, il",
            Some("Sangamon County"),
        )]);
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_external());

        let found = cache
            .geocode("1 Sheriffs Plaza", "SPRINGFIELD", "IL")
            .await
            .expect("cached");
        assert_eq!(found.source, ProviderKind::Cache);
        assert_eq!(found.address.county.as_deref(), Some("Sangamon County"));
        assert_eq!(found.address.zip.as_deref(), Some("62701"));
        assert_eq!(found.raw_payload["source"], "Positionstack");
    }

    #[tokio::test]
    async fn miss_is_no_result() {
        let cache = CacheGeocoder::from_entries(Vec::new());
        let err = cache.geocode("a", "b", "c").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
