//! Nominatim / OpenStreetMap: free, keyless, county detail not guaranteed.

use async_trait::async_trait;
use courtlink_shared::{GeocodingConfig, ProviderKind, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::{GeocodeError, GeocodeMatch, Geocoder, build_client, endpoint};

const KIND: ProviderKind = ProviderKind::Nominatim;

pub struct NominatimGeocoder {
    client: Client,
    search_url: Url,
    country: String,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocodingConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(&config.user_agent, config.timeout)?,
            search_url: endpoint(&config.nominatim_url, "search")?,
            country: config.country.to_lowercase(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    async fn geocode(
        &self,
        street: &str,
        city: &str,
        state: &str,
    ) -> std::result::Result<GeocodeMatch, GeocodeError> {
        let query = format!("{street}, {city}, {state}, USA");
        debug!(%query, "nominatim search");

        let response = self
            .client
            .get(self.search_url.clone())
            .query(&[
                ("q", query.as_str()),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("limit", "1"),
                ("countrycodes", self.country.as_str()),
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

        let body: Value = response
            .json()
            .await
            .map_err(|e| GeocodeError::from_reqwest(KIND, &e))?;

        let candidate = match body {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            Value::Array(_) => return Err(GeocodeError::NoResult { provider: KIND }),
            other => {
                return Err(GeocodeError::Service {
                    provider: KIND,
                    message: format!("unexpected response shape: {}", shape(&other)),
                });
            }
        };

        GeocodeMatch::from_candidate(KIND, query, candidate)
    }
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
