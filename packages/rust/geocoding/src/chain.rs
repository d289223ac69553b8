//! Ordered provider fallback with per-provider retry and request pacing.

use std::time::Duration;

use courtlink_shared::{GeocodingConfig, ProviderKind, Result};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::{
    CacheGeocoder, GeocodeError, GeocodeMatch, Geocoder, NominatimGeocoder, PositionstackGeocoder,
};

/// How many times one provider is tried, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles for each later one.
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
        }
    }

    pub const fn exponential(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
        }
    }

    /// Wait after failed attempt `attempt` (1-based): base, 2x base, 4x base...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1 << exponent)
    }
}

/// Result of running an address through the chain.
#[derive(Debug, Clone)]
pub enum GeocodeOutcome {
    Matched(GeocodeMatch),
    /// Every provider failed; one entry per attempt, in order.
    Failed { failures: Vec<GeocodeError> },
}

impl GeocodeOutcome {
    pub fn into_match(self) -> Option<GeocodeMatch> {
        match self {
            Self::Matched(m) => Some(m),
            Self::Failed { .. } => None,
        }
    }
}

struct ChainEntry {
    geocoder: Box<dyn Geocoder>,
    retry: RetryPolicy,
}

/// Providers in fallback order.
pub struct GeocodingChain {
    entries: Vec<ChainEntry>,
    request_delay: Duration,
}

impl GeocodingChain {
    /// Empty chain pausing `request_delay` after every external call.
    pub fn new(request_delay: Duration) -> Self {
        Self {
            entries: Vec::new(),
            request_delay,
        }
    }

    /// Append a provider at the lowest priority.
    pub fn with_provider(mut self, geocoder: impl Geocoder + 'static, retry: RetryPolicy) -> Self {
        self.entries.push(ChainEntry {
            geocoder: Box::new(geocoder),
            retry,
        });
        self
    }

    /// Nominatim with retries, then Positionstack once if a key is configured.
    pub fn from_config(config: &GeocodingConfig) -> Result<Self> {
        let mut chain = Self::new(config.request_delay).with_provider(
            NominatimGeocoder::new(config)?,
            RetryPolicy::exponential(config.max_attempts, config.backoff_base),
        );
        if config.api_key.is_some() {
            chain = chain.with_provider(PositionstackGeocoder::new(config)?, RetryPolicy::once());
        } else {
            info!("no secondary geocoder key configured, using primary provider only");
        }
        Ok(chain)
    }

    /// Chain that never leaves the process.
    pub fn offline(cache: CacheGeocoder) -> Self {
        Self::new(Duration::ZERO).with_provider(cache, RetryPolicy::once())
    }

    /// Provider order, for logs and run reports.
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.entries.iter().map(|e| e.geocoder.kind()).collect()
    }

    /// Run the address through every provider until one matches.
    #[instrument(skip_all, fields(city = %city, state = %state))]
    pub async fn geocode(&self, street: &str, city: &str, state: &str) -> GeocodeOutcome {
        let mut failures = Vec::new();

        for (position, entry) in self.entries.iter().enumerate() {
            let provider = entry.geocoder.kind();
            if position > 0 {
                info!(%provider, "falling back to next geocoder");
            }

            for attempt in 1..=entry.retry.max_attempts.max(1) {
                let result = entry.geocoder.geocode(street, city, state).await;
                if entry.geocoder.is_external() && !self.request_delay.is_zero() {
                    sleep(self.request_delay).await;
                }

                match result {
                    Ok(found) => {
                        debug!(%provider, attempt, "geocode matched");
                        return GeocodeOutcome::Matched(found);
                    }
                    Err(err) => {
                        let retry = err.is_retryable() && attempt < entry.retry.max_attempts;
                        warn!(
                            %provider,
                            attempt,
                            kind = err.as_str(),
                            error = %err,
                            will_retry = retry,
                            "geocode attempt failed"
                        );
                        failures.push(err);
                        if !retry {
                            break;
                        }
                        sleep(entry.retry.backoff(attempt)).await;
                    }
                }
            }
        }

        GeocodeOutcome::Failed { failures }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use courtlink_shared::{AddressFields, AppConfig};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    type Respond = dyn Fn(usize) -> std::result::Result<GeocodeMatch, GeocodeError> + Send + Sync;

    /// Provider whose answer depends on the call number (1-based).
    struct Scripted {
        kind: ProviderKind,
        calls: Arc<AtomicUsize>,
        respond: Box<Respond>,
    }

    impl Scripted {
        fn new(
            kind: ProviderKind,
            respond: impl Fn(usize) -> std::result::Result<GeocodeMatch, GeocodeError>
            + Send
            + Sync
            + 'static,
        ) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    kind,
                    calls: calls.clone(),
                    respond: Box::new(respond),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl Geocoder for Scripted {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn geocode(
            &self,
            _street: &str,
            _city: &str,
            _state: &str,
        ) -> std::result::Result<GeocodeMatch, GeocodeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (self.respond)(n)
        }
    }

    fn sangamon(kind: ProviderKind) -> GeocodeMatch {
        GeocodeMatch {
            source: kind,
            query: "1 Sheriffs Plaza, Springfield, IL".into(),
            address: AddressFields {
                county: Some("Sangamon".into()),
                state: Some("IL".into()),
                latitude: Some(39.8),
                longitude: Some(-89.6),
                ..Default::default()
            },
            raw_payload: json!({"county": "Sangamon", "region_code": "IL"}),
        }
    }

    fn retrying() -> RetryPolicy {
        RetryPolicy::exponential(3, Duration::ZERO)
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::exponential(3, Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(RetryPolicy::once().backoff(1), Duration::ZERO);
    }

    #[tokio::test]
    async fn primary_timeouts_fall_back_to_secondary_once() {
        let (primary, primary_calls) = Scripted::new(ProviderKind::Nominatim, |_| {
            Err(GeocodeError::Timeout {
                provider: ProviderKind::Nominatim,
            })
        });
        let (secondary, secondary_calls) = Scripted::new(ProviderKind::Positionstack, |_| {
            Ok(sangamon(ProviderKind::Positionstack))
        });

        let chain = GeocodingChain::new(Duration::ZERO)
            .with_provider(primary, retrying())
            .with_provider(secondary, RetryPolicy::once());

        let outcome = chain.geocode("1 Sheriffs Plaza", "Springfield", "IL").await;
        let found = outcome.into_match().expect("secondary match");
        assert_eq!(found.source, ProviderKind::Positionstack);
        assert_eq!(found.address.county.as_deref(), Some("Sangamon"));
        assert_eq!(primary_calls.load(Ordering::SeqCst), 3);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn external_calls_are_paced_and_backed_off() {
        let (primary, primary_calls) = Scripted::new(ProviderKind::Nominatim, |_| {
            Err(GeocodeError::Timeout {
                provider: ProviderKind::Nominatim,
            })
        });
        let (secondary, secondary_calls) = Scripted::new(ProviderKind::Positionstack, |_| {
            Ok(sangamon(ProviderKind::Positionstack))
        });
        let chain = GeocodingChain::new(Duration::from_secs(1))
            .with_provider(primary, RetryPolicy::exponential(3, Duration::from_secs(1)))
            .with_provider(secondary, RetryPolicy::once());

        let started = tokio::time::Instant::now();
        let found = chain.geocode("1 Sheriffs Plaza", "Springfield", "IL").await;
        let elapsed = started.elapsed();

        assert!(found.into_match().is_some());
        assert_eq!(primary_calls.load(Ordering::SeqCst), 3);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
        // Four calls with a 1s pause each, plus 1s and 2s backoff between primary attempts.
        assert!(elapsed >= Duration::from_secs(7), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(8), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cache_lookups_are_not_paced() {
        let key = courtlink_intake::query_key("1 Sheriffs Plaza", "Springfield", "IL");
        let cache = CacheGeocoder::from_entries([courtlink_intake::CachedGeocode {
            query_key: key,
            name: None,
            latitude: 39.8017,
            longitude: -89.6437,
            normalized_address: Some("1 Sheriffs Plaza, Springfield, IL 62701, USA".into()),
            source: Some("Positionstack".into()),
            county: Some("Sangamon County".into()),
            timestamp: None,
        }]);
        let chain = GeocodingChain::new(Duration::from_secs(1))
            .with_provider(cache, RetryPolicy::exponential(3, Duration::from_secs(1)));

        let started = tokio::time::Instant::now();
        let hit = chain.geocode("1 Sheriffs Plaza", "Springfield", "IL").await;
        let miss = chain.geocode("9 Elsewhere", "Nowhere", "ZZ").await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(hit.into_match().is_some());
        assert!(miss.into_match().is_none());
    }

    #[tokio::test]
    async fn empty_result_is_not_retried() {
        let (primary, primary_calls) = Scripted::new(ProviderKind::Nominatim, |_| {
            Err(GeocodeError::NoResult {
                provider: ProviderKind::Nominatim,
            })
        });
        let chain = GeocodingChain::new(Duration::ZERO).with_provider(primary, retrying());

        match chain.geocode("x", "y", "IL").await {
            GeocodeOutcome::Failed { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].as_str(), "empty_result");
            }
            GeocodeOutcome::Matched(_) => panic!("expected failure"),
        }
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_error_recovers_on_retry() {
        let (primary, primary_calls) = Scripted::new(ProviderKind::Nominatim, |n| {
            if n == 1 {
                Err(GeocodeError::Service {
                    provider: ProviderKind::Nominatim,
                    message: "HTTP 503".into(),
                })
            } else {
                Ok(sangamon(ProviderKind::Nominatim))
            }
        });
        let (secondary, secondary_calls) = Scripted::new(ProviderKind::Positionstack, |_| {
            Ok(sangamon(ProviderKind::Positionstack))
        });
        let chain = GeocodingChain::new(Duration::ZERO)
            .with_provider(primary, retrying())
            .with_provider(secondary, RetryPolicy::once());

        let found = chain.geocode("a", "b", "IL").await.into_match().expect("match");
        assert_eq!(found.source, ProviderKind::Nominatim);
        assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_providers_failing_yields_failure_list() {
        let (primary, _) = Scripted::new(ProviderKind::Nominatim, |_| {
            Err(GeocodeError::Timeout {
                provider: ProviderKind::Nominatim,
            })
        });
        let (secondary, _) = Scripted::new(ProviderKind::Positionstack, |_| {
            Err(GeocodeError::NoResult {
                provider: ProviderKind::Positionstack,
            })
        });
        let chain = GeocodingChain::new(Duration::ZERO)
            .with_provider(primary, retrying())
            .with_provider(secondary, RetryPolicy::once());
        assert_eq!(
            chain.providers(),
            vec![ProviderKind::Nominatim, ProviderKind::Positionstack]
        );

        match chain.geocode("a", "b", "IL").await {
            GeocodeOutcome::Failed { failures } => {
                let kinds: Vec<_> = failures.iter().map(|f| f.as_str()).collect();
                assert_eq!(kinds, ["timeout", "timeout", "timeout", "empty_result"]);
            }
            GeocodeOutcome::Matched(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn configured_chain_against_mock_providers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("[]")
                    .set_delay(Duration::from_secs(2)),
            )
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/forward"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data": [{"latitude": 39.8, "longitude": -89.6, "county": "Sangamon", "region_code": "IL"}]}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let mut config =
            GeocodingConfig::from(&AppConfig::default()).with_api_key(Some("k".into()));
        config.nominatim_url = server.uri();
        config.positionstack_url = server.uri();
        config.timeout = Duration::from_millis(200);
        config.backoff_base = Duration::ZERO;
        config.request_delay = Duration::ZERO;

        let chain = GeocodingChain::from_config(&config).expect("chain");
        let found = chain
            .geocode("1 Sheriffs Plaza", "Springfield", "IL")
            .await
            .into_match()
            .expect("fallback match");
        assert_eq!(found.source, ProviderKind::Positionstack);
        assert_eq!(found.address.state.as_deref(), Some("IL"));
    }

    #[tokio::test]
    async fn chain_without_key_has_only_primary() {
        let config = GeocodingConfig::from(&AppConfig::default());
        let chain = GeocodingChain::from_config(&config).expect("chain");
        assert_eq!(chain.providers(), vec![ProviderKind::Nominatim]);
    }
}
