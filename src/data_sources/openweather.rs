//! OpenWeatherMap client.
//!
//! Uses the current-weather endpoint, one request per city:
//!
//! ```text
//! GET {base}/weather?q={city}&appid={key}&units={units}
//! ```
//!
//! # API Reference
//!
//! See: <https://openweathermap.org/current>
//!
//! # Rate Limits
//!
//! The free tier allows 60 calls per minute. A 429 response is reported as
//! [`FetchError::RateLimited`] and the city is simply retried on the next tick.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::WeatherSource;
use crate::error::FetchError;
use crate::model::Observation;

/// Base URL for the OpenWeatherMap API.
const OPENWEATHER_API_BASE: &str = "https://api.openweathermap.org/data/2.5";

/// Client for the OpenWeatherMap current-weather API.
#[derive(Clone)]
pub struct OpenWeatherClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    units: String,
}

impl OpenWeatherClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenWeatherMap API key
    /// * `units` - `standard` (Kelvin), `metric` (Celsius) or `imperial` (Fahrenheit)
    /// * `timeout` - Per-request timeout
    pub fn new(api_key: &str, units: &str, timeout: Duration) -> reqwest::Result<Self> {
        Self::with_base_url(OPENWEATHER_API_BASE, api_key, units, timeout)
    }

    /// Create a client with a custom base URL (for testing).
    pub fn with_base_url(
        base_url: &str,
        api_key: &str,
        units: &str,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            units: units.to_string(),
        })
    }

    fn weather_url(&self, city: &str) -> String {
        format!(
            "{}/weather?q={}&appid={}&units={}",
            self.base_url,
            urlencoding::encode(city),
            urlencoding::encode(&self.api_key),
            self.units
        )
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn fetch(&self, city: &str) -> Result<Observation, FetchError> {
        let response = self.client.get(self.weather_url(city)).send().await?;

        if let Some(err) = classify_status(response.status(), city) {
            return Err(err);
        }

        let data = response.json::<CurrentWeatherResponse>().await?;
        data.into_observation(city)
    }
}

/// Map a non-success HTTP status onto the fetch error taxonomy.
fn classify_status(status: StatusCode, city: &str) -> Option<FetchError> {
    match status {
        s if s.is_success() => None,
        StatusCode::NOT_FOUND => Some(FetchError::NotFound(city.to_string())),
        StatusCode::TOO_MANY_REQUESTS => Some(FetchError::RateLimited),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Some(FetchError::Timeout),
        s => Some(FetchError::Provider(format!("unexpected status {s}"))),
    }
}

// ============================================================================
// Response types
// ============================================================================

/// Response from the current-weather endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentWeatherResponse {
    /// Condition groups; the first entry is the primary one.
    #[serde(default)]
    pub weather: Vec<WeatherCondition>,

    /// Main measurements.
    pub main: MainReadings,

    /// Measurement time (Unix timestamp, UTC).
    pub dt: i64,

    /// City name as resolved by the provider.
    #[serde(default)]
    pub name: String,
}

/// A single condition group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherCondition {
    /// Condition group (e.g. "Clear", "Rain", "Haze").
    pub main: String,

    /// Longer description (e.g. "light rain").
    #[serde(default)]
    pub description: String,

    /// Icon code (e.g. "01d").
    #[serde(default)]
    pub icon: String,
}

/// Temperature and related readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainReadings {
    /// Temperature in the requested unit.
    pub temp: f64,

    /// Perceived temperature.
    #[serde(default)]
    pub feels_like: Option<f64>,

    /// Relative humidity in percent.
    #[serde(default)]
    pub humidity: Option<f64>,
}

impl CurrentWeatherResponse {
    /// Convert into an observation for the configured city name.
    ///
    /// The configured name is kept rather than the provider's resolved name
    /// so aggregates stay keyed by configuration.
    pub fn into_observation(self, city: &str) -> Result<Observation, FetchError> {
        let condition = self
            .weather
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::Provider("response has no weather conditions".into()))?;

        let timestamp = DateTime::<Utc>::from_timestamp(self.dt, 0)
            .ok_or_else(|| FetchError::Provider(format!("invalid timestamp {}", self.dt)))?;

        if !self.main.temp.is_finite() {
            return Err(FetchError::Provider("non-finite temperature".into()));
        }

        Ok(Observation {
            city: city.to_string(),
            timestamp,
            temperature: self.main.temp,
            condition: condition.main,
            icon: condition.icon,
        })
    }
}
