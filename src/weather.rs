//! Current weather conditions via the Open-Meteo API.
//!
//! `OpenMeteoClient` fetches the `current_weather` block for a coordinate
//! and `WeatherFetcher` adds the bounded retry policy: at most one retry
//! after a short backoff, after which the failure surfaces as a degraded
//! source rather than a pipeline error.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::geo::GeoCoordinate;

/// Errors from the weather service.
#[derive(Debug, Error)]
pub enum WeatherError {
    /// Timeout, network failure, non-success status, or malformed payload.
    #[error("Weather service unavailable: {0}")]
    Unavailable(String),
}

/// Point-in-time weather conditions at a coordinate.
///
/// Never persisted; recomputed for every answer request. Callers must
/// treat the values as a snapshot taken at `fetched_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    /// The coordinate the conditions were fetched for.
    pub coordinate: GeoCoordinate,
    /// Current temperature in degrees Celsius.
    pub temperature_c: f64,
    /// Human-readable condition summary derived from the WMO weather code.
    pub summary: String,
    /// When the conditions were fetched.
    pub fetched_at: OffsetDateTime,
}

/// Trait for weather backends.
///
/// Returns the current temperature in Celsius and the WMO weather code.
/// Enables mocking in unit tests; `OpenMeteoClient` is the production
/// implementation.
pub trait WeatherService: Send + Sync {
    /// Fetches current conditions for a coordinate.
    fn current_conditions(&self, latitude: f64, longitude: f64) -> Result<(f64, u32), WeatherError>;
}

impl<W: WeatherService + ?Sized> WeatherService for Box<W> {
    fn current_conditions(&self, latitude: f64, longitude: f64) -> Result<(f64, u32), WeatherError> {
        (**self).current_conditions(latitude, longitude)
    }
}

/// HTTP client for the Open-Meteo forecast endpoint.
pub struct OpenMeteoClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl OpenMeteoClient {
    /// Creates a client against the configured endpoint.
    ///
    /// Reads `OPEN_METEO_URL`, defaulting to the public
    /// `https://api.open-meteo.com` instance.
    pub fn from_env() -> Result<Self, WeatherError> {
        let base_url = std::env::var("OPEN_METEO_URL")
            .unwrap_or_else(|_| "https://api.open-meteo.com".to_string());
        Self::new(base_url)
    }

    /// Creates a client against the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, WeatherError> {
        let base_url = base_url.into();
        reqwest::Url::parse(&base_url).map_err(|e| {
            WeatherError::Unavailable(format!("invalid base URL {}: {}", base_url, e))
        })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| WeatherError::Unavailable(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Returns the base URL configured for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl WeatherService for OpenMeteoClient {
    fn current_conditions(&self, latitude: f64, longitude: f64) -> Result<(f64, u32), WeatherError> {
        let url = format!("{}/v1/forecast", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current_weather", "true".to_string()),
            ])
            .send()
            .map_err(|e| WeatherError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::Unavailable(format!("HTTP status {}", status)));
        }

        let json: serde_json::Value = response
            .json()
            .map_err(|e| WeatherError::Unavailable(e.to_string()))?;

        let current = json
            .get("current_weather")
            .ok_or_else(|| WeatherError::Unavailable("missing current_weather".to_string()))?;

        let temperature = current
            .get("temperature")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| WeatherError::Unavailable("missing temperature".to_string()))?;
        let code = current
            .get("weathercode")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| WeatherError::Unavailable("missing weathercode".to_string()))?;

        Ok((temperature, code as u32))
    }
}

/// Maps a WMO weather interpretation code to a condition summary.
pub fn describe_weather_code(code: u32) -> String {
    let description = match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        71 => "Slight snow",
        73 => "Moderate snow",
        75 => "Heavy snow",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        other => return format!("Weather code {}", other),
    };
    description.to_string()
}

/// Fetches current weather with a bounded retry policy.
pub struct WeatherFetcher<W: WeatherService> {
    service: W,
    retry_backoff: Duration,
}

impl<W: WeatherService> WeatherFetcher<W> {
    /// Creates a fetcher with the default 1 second retry backoff.
    pub fn new(service: W) -> Self {
        Self {
            service,
            retry_backoff: Duration::from_secs(1),
        }
    }

    /// Overrides the backoff between the first attempt and the single retry.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Fetches a weather snapshot for the resolved coordinate.
    ///
    /// Retries exactly once after the backoff, then surfaces
    /// `WeatherError::Unavailable` to the caller.
    pub fn fetch(&self, coordinate: &GeoCoordinate) -> Result<WeatherSnapshot, WeatherError> {
        let (temperature_c, code) = match self
            .service
            .current_conditions(coordinate.latitude, coordinate.longitude)
        {
            Ok(conditions) => conditions,
            Err(first_error) => {
                warn!(
                    destination = %coordinate.name,
                    error = %first_error,
                    "weather fetch failed, retrying once"
                );
                thread::sleep(self.retry_backoff);
                self.service
                    .current_conditions(coordinate.latitude, coordinate.longitude)?
            }
        };

        let summary = describe_weather_code(code);
        info!(
            destination = %coordinate.name,
            temperature_c,
            summary = %summary,
            "fetched current weather"
        );

        Ok(WeatherSnapshot {
            coordinate: coordinate.clone(),
            temperature_c,
            summary,
            fetched_at: OffsetDateTime::now_utc(),
        })
    }
}
