//! Positionstack: keyed fallback that returns county detail on request.

use async_trait::async_trait;
use courtlink_shared::{CourtLinkError, GeocodingConfig, ProviderKind, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::{GeocodeError, GeocodeMatch, Geocoder, build_client, endpoint};

const KIND: ProviderKind = ProviderKind::Positionstack;

pub struct PositionstackGeocoder {
    client: Client,
    forward_url: Url,
    api_key: String,
    country: String,
}

impl PositionstackGeocoder {
    /// Fails with a config error when no API key is configured.
    pub fn new(config: &GeocodingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| CourtLinkError::config("positionstack requires an API key"))?;
        Ok(Self {
            client: build_client(&config.user_agent, config.timeout)?,
            forward_url: endpoint(&config.positionstack_url, "v1/forward")?,
            api_key,
            country: config.country.to_uppercase(),
        })
    }
}

#[async_trait]
impl Geocoder for PositionstackGeocoder {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    async fn geocode(
        &self,
        street: &str,
        city: &str,
        state: &str,
    ) -> std::result::Result<GeocodeMatch, GeocodeError> {
        let query = format!("{street}, {city}, {state}");
        debug!(%query, "positionstack forward");

        let response = self
            .client
            .get(self.forward_url.clone())
            .query(&[
                ("access_key", self.api_key.as_str()),
                ("query", query.as_str()),
                ("limit", "1"),
                ("country", self.country.as_str()),
                ("output_format", "json"),
                ("county_module", "1"),
            ])
            .send()
            .await
            .map_err(|e| GeocodeError::from_reqwest(KIND, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Service {
                provider: KIND,
                message: format!("HTTP {status}"),
            });
        }

        let mut body: Value = response
            .json()
            .await
            .map_err(|e| GeocodeError::from_reqwest(KIND, &e))?;

        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("error object in response")
                .to_string();
            return Err(GeocodeError::Service {
                provider: KIND,
                message,
            });
        }

        // No-result responses come back as `[]` or `[[]]`.
        let candidate = match body.get_mut("data").map(Value::take) {
            Some(Value::Array(mut items)) if !items.is_empty() => items.swap_remove(0),
            _ => return Err(GeocodeError::NoResult { provider: KIND }),
        };
        if !candidate.is_object() {
            return Err(GeocodeError::NoResult { provider: KIND });
        }

        GeocodeMatch::from_candidate(KIND, query, candidate)
    }
}

#[cfg(test)]
mod tests {
    use courtlink_shared::AppConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config_for(server: &MockServer) -> GeocodingConfig {
        let mut config =
            GeocodingConfig::from(&AppConfig::default()).with_api_key(Some("test-key".into()));
        config.positionstack_url = server.uri();
        config
    }

    #[test]
    fn requires_api_key() {
        let config = GeocodingConfig::from(&AppConfig::default());
        let err = PositionstackGeocoder::new(&config).err().expect("no key");
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn requests_county_module_and_maps_county() {
        let server = MockServer::start().await;
        let body = r#"{"data": [{
            "latitude": 39.8017, "longitude": -89.6437,
            "label": "1 Sheriffs Plaza, Springfield, IL, USA",
            "number": "1", "street": "Sheriffs Plaza", "postal_code": "62701",
            "county": "Sangamon", "region_code": "IL", "locality": "Springfield"
        }]}"#;
        Mock::given(method("GET"))
            .and(path("/v1/forward"))
            .and(query_param("access_key", "test-key"))
            .and(query_param("query", "1 Sheriffs Plaza, Springfield, IL"))
            .and(query_param("county_module", "1"))
            .and(query_param("country", "US"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let geocoder = PositionstackGeocoder::new(&config_for(&server)).unwrap();
        let found = geocoder
            .geocode("1 Sheriffs Plaza", "Springfield", "IL")
            .await
            .expect("match");
        assert_eq!(found.source, ProviderKind::Positionstack);
        assert_eq!(found.address.county.as_deref(), Some("Sangamon"));
        assert_eq!(found.address.street.as_deref(), Some("1 Sheriffs Plaza"));
    }

    #[tokio::test]
    async fn nested_empty_data_is_no_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forward"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"data": [[]]}"#))
            .mount(&server)
            .await;

        let geocoder = PositionstackGeocoder::new(&config_for(&server)).unwrap();
        let err = geocoder.geocode("a", "b", "IL").await.unwrap_err();
        assert_eq!(err.as_str(), "empty_result");
    }

    #[tokio::test]
    async fn error_body_is_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forward"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"error": {"code": "invalid_access_key", "message": "You have not supplied a valid API Access Key."}}"#,
            ))
            .mount(&server)
            .await;

        let geocoder = PositionstackGeocoder::new(&config_for(&server)).unwrap();
        let err = geocoder.geocode("a", "b", "IL").await.unwrap_err();
        assert_eq!(err.as_str(), "service_error");
        assert!(err.to_string().contains("valid API Access Key"));
    }
}
