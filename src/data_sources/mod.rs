//! Weather data sources.
//!
//! The pipeline only depends on the [`WeatherSource`] trait: given a city,
//! return one point [`Observation`] or a [`FetchError`].
//!
//! # Data Sources
//!
//! - [`openweather`]: OpenWeatherMap current-weather API

pub mod openweather;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::model::Observation;

pub use openweather::OpenWeatherClient;

/// A provider of current weather observations.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Fetch the current observation for `city`.
    async fn fetch(&self, city: &str) -> Result<Observation, FetchError>;
}
