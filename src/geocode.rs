//! Place-name resolution.
//!
//! A [`GeoResolver`] turns a free-text location into a [`Coordinate`].
//! Two implementations ship with the crate:
//!
//! - [`GoogleGeocoder`] calls the Google Geocoding API.
//! - [`StaticGeoResolver`] looks names up in a fixed table (from
//!   `[geocode.places]`), for offline use and tests.
//!
//! Both accept `"lat,lon"` literals directly. Resolvers never retry on
//! their own; rate limiting is reported to the caller as
//! [`GeoError::RateLimited`].

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use trailscout_core::geo::Coordinate;

use crate::config::GeocodeConfig;

const GOOGLE_GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("no match for '{0}'")]
    NotFound(String),
    #[error("geocoding rate limit reached")]
    RateLimited,
    #[error("geocoding failed: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait GeoResolver: Send + Sync {
    /// Resolver name for logs (e.g. `"google"`).
    fn name(&self) -> &str;

    async fn resolve(&self, place: &str) -> Result<Coordinate, GeoError>;
}

/// Normalize a place name for comparisons: trimmed, lower-cased, inner
/// whitespace collapsed.
pub fn normalize_place(place: &str) -> String {
    place
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Build the resolver selected by `config.provider`.
pub fn create_resolver(config: &GeocodeConfig) -> Result<Arc<dyn GeoResolver>> {
    match config.provider.as_str() {
        "google" => Ok(Arc::new(GoogleGeocoder::from_config(config)?)),
        "static" => Ok(Arc::new(StaticGeoResolver::new(config.places.clone()))),
        other => Err(anyhow!("Unknown geocode provider: {}", other)),
    }
}

// ============ Static ============

/// Resolves names from a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticGeoResolver {
    places: HashMap<String, Coordinate>,
}

impl StaticGeoResolver {
    pub fn new(places: HashMap<String, Coordinate>) -> Self {
        Self {
            places: places
                .into_iter()
                .map(|(name, coord)| (normalize_place(&name), coord))
                .collect(),
        }
    }

    pub fn with_place(mut self, name: &str, coord: Coordinate) -> Self {
        self.places.insert(normalize_place(name), coord);
        self
    }
}

#[async_trait]
impl GeoResolver for StaticGeoResolver {
    fn name(&self) -> &str {
        "static"
    }

    async fn resolve(&self, place: &str) -> Result<Coordinate, GeoError> {
        if let Some(coord) = Coordinate::parse_literal(place) {
            return Ok(coord);
        }
        self.places
            .get(&normalize_place(place))
            .copied()
            .ok_or_else(|| GeoError::NotFound(place.to_string()))
    }
}

// ============ Google ============

/// Google Geocoding API client.
///
/// Status mapping: `OK` → first result, `ZERO_RESULTS` → `NotFound`,
/// `OVER_QUERY_LIMIT` or HTTP 429 → `RateLimited`, anything else →
/// `Unavailable`.
pub struct GoogleGeocoder {
    client: reqwest::Client,
    api_key: String,
    country: Option<String>,
    endpoint: String,
}

impl GoogleGeocoder {
    pub fn from_config(config: &GeocodeConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            country: config.country.clone(),
            endpoint: GOOGLE_GEOCODE_URL.to_string(),
        })
    }

    /// Point the client at a different endpoint (used against local test servers).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Interpret a Geocoding API response body.
fn parse_google_response(place: &str, json: &serde_json::Value) -> Result<Coordinate, GeoError> {
    let status = json
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("UNKNOWN_ERROR");

    match status {
        "OK" => {
            let location = json
                .get("results")
                .and_then(|r| r.get(0))
                .and_then(|r| r.get("geometry"))
                .and_then(|g| g.get("location"))
                .ok_or_else(|| GeoError::Unavailable("response missing geometry".to_string()))?;
            let lat = location.get("lat").and_then(|v| v.as_f64());
            let lng = location.get("lng").and_then(|v| v.as_f64());
            match (lat, lng) {
                (Some(lat), Some(lng)) => {
                    let coord = Coordinate::new(lat, lng);
                    if coord.is_valid() {
                        Ok(coord)
                    } else {
                        Err(GeoError::Unavailable(format!(
                            "out-of-range coordinate {},{}",
                            lat, lng
                        )))
                    }
                }
                _ => Err(GeoError::Unavailable(
                    "response missing lat/lng".to_string(),
                )),
            }
        }
        "ZERO_RESULTS" => Err(GeoError::NotFound(place.to_string())),
        "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => Err(GeoError::RateLimited),
        other => {
            let detail = json
                .get("error_message")
                .and_then(|m| m.as_str())
                .unwrap_or("");
            Err(GeoError::Unavailable(format!("{} {}", other, detail).trim().to_string()))
        }
    }
}

#[async_trait]
impl GeoResolver for GoogleGeocoder {
    fn name(&self) -> &str {
        "google"
    }

    async fn resolve(&self, place: &str) -> Result<Coordinate, GeoError> {
        if let Some(coord) = Coordinate::parse_literal(place) {
            return Ok(coord);
        }

        let mut query = vec![("address", place.to_string()), ("key", self.api_key.clone())];
        if let Some(country) = &self.country {
            query.push(("components", format!("country:{}", country)));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| GeoError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(GeoError::RateLimited);
        }
        if !status.is_success() {
            return Err(GeoError::Unavailable(format!("HTTP {}", status)));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GeoError::Unavailable(e.to_string()))?;
        let result = parse_google_response(place, &json);
        if let Err(err) = &result {
            tracing::debug!(place, error = %err, "geocoding did not produce a coordinate");
        }
        result
    }
}
