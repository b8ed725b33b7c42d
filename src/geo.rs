//! Destination geocoding with a process-lifetime cache.
//!
//! `NominatimClient` talks to a Nominatim-compatible search endpoint;
//! `GeoResolver` wraps any `Geocoder` with an exact-name cache so repeated
//! questions about the same destination hit the network at most once.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Errors from geocoding lookups.
///
/// Both variants are recoverable at the pipeline level: a failed lookup
/// degrades the weather branch, it never fails the whole answer.
#[derive(Debug, Error)]
pub enum GeoError {
    /// The service responded but found no match for the name.
    #[error("No coordinates found for '{0}'")]
    NotFound(String),

    /// The service could not be reached or returned a server error.
    #[error("Geocoding service unavailable: {0}")]
    Unavailable(String),
}

/// A resolved coordinate for a destination name.
///
/// Cache entries are keyed by exact name and are immutable once computed;
/// a deleted destination's cached coordinate is reused if the name comes
/// back.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoCoordinate {
    /// The destination name this coordinate was resolved from.
    pub name: String,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// When the resolution happened.
    pub resolved_at: OffsetDateTime,
}

/// Trait for geocoding backends.
///
/// Enables mocking in unit tests; `NominatimClient` is the production
/// implementation.
pub trait Geocoder: Send + Sync {
    /// Resolves a free-form place name to (latitude, longitude).
    fn geocode(&self, name: &str) -> Result<(f64, f64), GeoError>;
}

impl<G: Geocoder + ?Sized> Geocoder for Box<G> {
    fn geocode(&self, name: &str) -> Result<(f64, f64), GeoError> {
        (**self).geocode(name)
    }
}

/// HTTP client for a Nominatim-compatible geocoding endpoint.
pub struct NominatimClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl NominatimClient {
    /// Nominatim requires an identifying User-Agent on every request.
    const USER_AGENT: &'static str = "waypoint-travel-advisor";

    /// Creates a client against the configured endpoint.
    ///
    /// Reads `NOMINATIM_URL`, defaulting to the public
    /// `https://nominatim.openstreetmap.org` instance.
    pub fn from_env() -> Result<Self, GeoError> {
        let base_url = std::env::var("NOMINATIM_URL")
            .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string());
        Self::new(base_url)
    }

    /// Creates a client against the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, GeoError> {
        let base_url = base_url.into();
        reqwest::Url::parse(&base_url)
            .map_err(|e| GeoError::Unavailable(format!("invalid base URL {}: {}", base_url, e)))?;

        let client = reqwest::blocking::Client::builder()
            .user_agent(Self::USER_AGENT)
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| GeoError::Unavailable(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Returns the base URL configured for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Geocoder for NominatimClient {
    fn geocode(&self, name: &str) -> Result<(f64, f64), GeoError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", name), ("format", "json"), ("limit", "1")])
            .send()
            .map_err(|e| GeoError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeoError::Unavailable(format!("HTTP status {}", status)));
        }

        let results: serde_json::Value = response
            .json()
            .map_err(|e| GeoError::Unavailable(e.to_string()))?;

        let first = results
            .as_array()
            .and_then(|arr| arr.first())
            .ok_or_else(|| GeoError::NotFound(name.to_string()))?;

        // Nominatim returns lat/lon as strings
        let latitude = first
            .get("lat")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| GeoError::Unavailable("malformed lat in response".to_string()))?;
        let longitude = first
            .get("lon")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| GeoError::Unavailable("malformed lon in response".to_string()))?;

        Ok((latitude, longitude))
    }
}

/// Resolves destination names to coordinates with a per-name cache.
///
/// The cache lives for the process lifetime and is never evicted. Entries
/// are immutable once inserted, so concurrent writes of the same name are
/// a harmless last-writer-wins race.
pub struct GeoResolver<G: Geocoder> {
    geocoder: G,
    cache: Mutex<HashMap<String, GeoCoordinate>>,
}

impl<G: Geocoder> GeoResolver<G> {
    /// Creates a resolver over the given geocoding backend.
    pub fn new(geocoder: G) -> Self {
        Self {
            geocoder,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a destination name, consulting the cache first.
    ///
    /// Only successful resolutions are cached; `NotFound` and
    /// `Unavailable` are returned each time so a transient outage does not
    /// poison the cache.
    pub fn resolve(&self, name: &str) -> Result<GeoCoordinate, GeoError> {
        {
            let cache = self.cache.lock().expect("geo cache lock poisoned");
            if let Some(coordinate) = cache.get(name) {
                return Ok(coordinate.clone());
            }
        }

        let (latitude, longitude) = self.geocoder.geocode(name).inspect_err(|e| {
            warn!(destination = %name, error = %e, "geocoding failed");
        })?;

        let coordinate = GeoCoordinate {
            name: name.to_string(),
            latitude,
            longitude,
            resolved_at: OffsetDateTime::now_utc(),
        };
        info!(destination = %name, latitude, longitude, "resolved coordinates");

        let mut cache = self.cache.lock().expect("geo cache lock poisoned");
        cache.insert(name.to_string(), coordinate.clone());
        Ok(coordinate)
    }

    /// Returns true if the name has a cached coordinate.
    pub fn is_cached(&self, name: &str) -> bool {
        self.cache
            .lock()
            .expect("geo cache lock poisoned")
            .contains_key(name)
    }
}
