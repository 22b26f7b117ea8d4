//! Process configuration.
//!
//! Everything is read once at startup from environment variables and is
//! static for the lifetime of the process. A configuration that fails
//! [`Config::validate`] must stop the process before anything is scheduled.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use crate::error::MonitorError;
use crate::model::AlertThreshold;

/// Cities monitored when `WEATHERWATCH_CITIES` is not set.
pub const DEFAULT_CITIES: &[&str] = &[
    "Delhi",
    "Mumbai",
    "Chennai",
    "Bengaluru",
    "Kolkata",
    "Hyderabad",
];

/// Default fetch interval (5 minutes).
const DEFAULT_FETCH_INTERVAL_SECS: u64 = 300;

/// Default summary window (1 day).
const DEFAULT_SUMMARY_WINDOW_SECS: u64 = 86_400;

/// Default alert rule: above 35 degrees for two consecutive readings.
const DEFAULT_ALERT_THRESHOLDS: &str = "temperature>35:2";

const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:weatherwatch.db?mode=rwc";

const DEFAULT_UNITS: &str = "metric";

#[derive(Debug, Clone)]
pub struct Config {
    pub cities: Vec<String>,
    pub fetch_interval: Duration,
    pub summary_window: Duration,
    pub thresholds: Vec<AlertThreshold>,
    pub max_concurrent_fetches: usize,
    pub shutdown_grace: Duration,
    pub database_url: String,
    pub port: u16,
    pub api_key: String,
    pub units: String,
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, MonitorError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup, then validate it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MonitorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let cities = match get("WEATHERWATCH_CITIES") {
            Some(list) => list
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            None => DEFAULT_CITIES.iter().map(|c| c.to_string()).collect(),
        };

        let thresholds = get("WEATHERWATCH_ALERT_THRESHOLDS")
            .unwrap_or_else(|| DEFAULT_ALERT_THRESHOLDS.to_string())
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(|t| t.parse::<AlertThreshold>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(MonitorError::ConfigInvalid)?;

        let config = Config {
            cities,
            fetch_interval: Duration::from_secs(parse_or(
                &get,
                "WEATHERWATCH_FETCH_INTERVAL_SECS",
                DEFAULT_FETCH_INTERVAL_SECS,
            )?),
            summary_window: Duration::from_secs(parse_or(
                &get,
                "WEATHERWATCH_SUMMARY_WINDOW_SECS",
                DEFAULT_SUMMARY_WINDOW_SECS,
            )?),
            thresholds,
            max_concurrent_fetches: parse_or(
                &get,
                "WEATHERWATCH_MAX_CONCURRENT_FETCHES",
                DEFAULT_MAX_CONCURRENT_FETCHES,
            )?,
            shutdown_grace: Duration::from_secs(parse_or(
                &get,
                "WEATHERWATCH_SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )?),
            database_url: get("WEATHERWATCH_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            port: parse_or(&get, "WEATHERWATCH_PORT", DEFAULT_PORT)?,
            api_key: get("OPENWEATHER_API_KEY").unwrap_or_default(),
            units: get("WEATHERWATCH_UNITS").unwrap_or_else(|| DEFAULT_UNITS.to_string()),
            request_timeout: Duration::from_secs(parse_or(
                &get,
                "WEATHERWATCH_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), MonitorError> {
        let invalid = |msg: String| Err(MonitorError::ConfigInvalid(msg));

        if self.cities.is_empty() {
            return invalid("at least one city must be configured".into());
        }
        let mut seen = HashSet::new();
        for city in &self.cities {
            if !seen.insert(city.to_lowercase()) {
                return invalid(format!("city '{city}' is configured more than once"));
            }
        }
        if self.fetch_interval.is_zero() {
            return invalid("fetch interval must be positive".into());
        }
        if self.summary_window.is_zero() {
            return invalid("summary window must be positive".into());
        }
        if self.max_concurrent_fetches == 0 {
            return invalid("max concurrent fetches must be positive".into());
        }
        for threshold in &self.thresholds {
            threshold.validate().map_err(MonitorError::ConfigInvalid)?;
        }
        if self.api_key.trim().is_empty() {
            return invalid("OPENWEATHER_API_KEY is required".into());
        }
        if !matches!(self.units.as_str(), "standard" | "metric" | "imperial") {
            return invalid(format!("unknown units '{}'", self.units));
        }

        Ok(())
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, MonitorError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MonitorError::ConfigInvalid(format!("{key} has invalid value '{raw}'"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, MonitorError> {
        let mut map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.entry("OPENWEATHER_API_KEY".to_string())
            .or_insert_with(|| "test-key".to_string());
        Config::from_lookup(|k| map.get(k).cloned())
    }

    fn assert_invalid(result: Result<Config, MonitorError>) {
        assert!(matches!(result, Err(MonitorError::ConfigInvalid(_))));
    }

    #[test]
    fn test_defaults() {
        let config = tokio_test::assert_ok!(load(&[]));

        assert_eq!(config.cities.len(), 6);
        assert_eq!(config.cities[0], "Delhi");
        assert_eq!(config.fetch_interval, Duration::from_secs(300));
        assert_eq!(config.summary_window, Duration::from_secs(86_400));
        assert_eq!(config.thresholds.len(), 1);
        assert_eq!(config.thresholds[0].consecutive, 2);
        assert_eq!(config.port, 3000);
        assert_eq!(config.units, "metric");
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WEATHERWATCH_CITIES", " Pune , Jaipur "),
            ("WEATHERWATCH_FETCH_INTERVAL_SECS", "60"),
            ("WEATHERWATCH_SUMMARY_WINDOW_SECS", "3600"),
            ("WEATHERWATCH_ALERT_THRESHOLDS", "temperature>40:3, temperature<2"),
            ("WEATHERWATCH_MAX_CONCURRENT_FETCHES", "2"),
        ]);
        let config = tokio_test::assert_ok!(config);

        assert_eq!(config.cities, vec!["Pune", "Jaipur"]);
        assert_eq!(config.fetch_interval, Duration::from_secs(60));
        assert_eq!(config.summary_window, Duration::from_secs(3600));
        assert_eq!(config.thresholds.len(), 2);
        assert_eq!(config.thresholds[1].value, 2.0);
        assert_eq!(config.max_concurrent_fetches, 2);
    }

    #[test]
    fn test_empty_city_list_is_invalid() {
        assert_invalid(load(&[("WEATHERWATCH_CITIES", " , ,")]));
    }

    #[test]
    fn test_duplicate_city_is_invalid() {
        assert_invalid(load(&[("WEATHERWATCH_CITIES", "Delhi,delhi")]));
    }

    #[test]
    fn test_malformed_threshold_is_invalid() {
        assert_invalid(load(&[("WEATHERWATCH_ALERT_THRESHOLDS", "temperature>35:0")]));
        assert_invalid(load(&[("WEATHERWATCH_ALERT_THRESHOLDS", "wind>10")]));
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        assert_invalid(load(&[("WEATHERWATCH_FETCH_INTERVAL_SECS", "0")]));
        assert_invalid(load(&[("WEATHERWATCH_SUMMARY_WINDOW_SECS", "0")]));
    }

    #[test]
    fn test_non_numeric_value_is_invalid() {
        assert_invalid(load(&[("WEATHERWATCH_PORT", "eighty")]));
    }

    #[test]
    fn test_missing_api_key_is_invalid() {
        assert_invalid(Config::from_lookup(|_| None));
    }
}
