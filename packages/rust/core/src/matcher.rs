//! County-to-court lookup.

use courtlink_shared::Court;
use courtlink_storage::Storage;
use tracing::{debug, error, warn};

/// Resolves the district court for a county/state pair.
///
/// Matching is case-insensitive substring containment on the county name in
/// either direction plus an exact state match; the first county row wins.
/// Lookups never fail: store errors are logged and treated as no match.
pub struct CountyCourtMatcher<'a> {
    storage: &'a Storage,
}

impl<'a> CountyCourtMatcher<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn find(&self, county: &str, state: &str) -> Option<Court> {
        if county.trim().is_empty() || state.trim().is_empty() {
            debug!(county, state, "county or state missing, nothing to match");
            return None;
        }

        match self.storage.find_court_for_county(county, state).await {
            Ok(Some((row, court))) => {
                debug!(
                    county,
                    state,
                    matched_county = %row.county_name,
                    court = %court.abbreviation,
                    "county matched"
                );
                Some(court)
            }
            Ok(None) => {
                warn!(county, state, "no court found for county");
                None
            }
            Err(e) => {
                error!(county, state, error = %e, "court lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::seeded_storage;

    #[tokio::test]
    async fn matches_in_both_directions() {
        let storage = seeded_storage().await;
        let matcher = CountyCourtMatcher::new(&storage);

        let court = matcher.find("Sangamon County", "IL").await.expect("match");
        assert_eq!(court.abbreviation, "ilcd");
        let court = matcher.find("sangamon", "il").await.expect("match");
        assert_eq!(court.abbreviation, "ilcd");
    }

    #[tokio::test]
    async fn state_must_agree() {
        let storage = seeded_storage().await;
        let matcher = CountyCourtMatcher::new(&storage);

        assert_eq!(
            matcher.find("Adams", "MS").await.map(|c| c.abbreviation),
            Some("mssd".to_string())
        );
        assert_eq!(
            matcher.find("Adams County", "IL").await.map(|c| c.abbreviation),
            Some("ilcd".to_string())
        );
        assert!(matcher.find("Sangamon", "MS").await.is_none());
    }

    #[tokio::test]
    async fn blanks_never_match() {
        let storage = seeded_storage().await;
        let matcher = CountyCourtMatcher::new(&storage);
        assert!(matcher.find("", "IL").await.is_none());
        assert!(matcher.find("Sangamon", " ").await.is_none());
    }
}
