//! Error types for the collection pipeline.
//!
//! Failures are split by where they originate:
//!
//! - [`FetchError`]: a single weather-provider call failed
//! - [`StoreError`]: a persistence call failed
//! - [`MonitorError`]: the pipeline-level taxonomy that callers log and recover from
//!
//! Only [`MonitorError::ConfigInvalid`] is fatal, and only at startup.

use chrono::{DateTime, Utc};

/// Failure of one weather-provider call for one city.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The provider did not answer within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The provider rejected the call because of its rate limit.
    #[error("rate limited by provider")]
    RateLimited,

    /// The provider does not know the requested city.
    #[error("city '{0}' not found")]
    NotFound(String),

    /// Any other transport, status, or decoding failure.
    #[error("provider error: {0}")]
    Provider(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Provider(err.to_string())
        }
    }
}

/// Failure of a persistence call against the summary store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An underlying SQLite error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored column could not be decoded back into its model type.
    #[error("invalid value '{value}' in column '{column}'")]
    InvalidRow { column: &'static str, value: String },
}

/// Pipeline-level error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The weather source failed for a city. Skipped until the next tick.
    #[error("weather source unavailable for '{city}': {source}")]
    SourceUnavailable {
        city: String,
        #[source]
        source: FetchError,
    },

    /// A city received no observations during a window.
    #[error("no observations for '{city}' in window starting {window_start}")]
    EmptyWindow {
        city: String,
        window_start: DateTime<Utc>,
    },

    /// A persistence call failed. Retried on the next finalization.
    #[error("summary store failure: {0}")]
    StoreFailure(#[from] StoreError),

    /// Startup configuration is unusable.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}
