//! Data models for weatherwatch.
//!
//! Observations flow in from a [`WeatherSource`](crate::data_sources::WeatherSource),
//! are folded into per-city aggregates, and leave the pipeline as
//! [`DailySummary`] rows and [`Alert`] records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A single point observation for one city.
///
/// Immutable once received. Each observation is folded exactly once and
/// evaluated against the alert thresholds exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// City identifier as configured (e.g. "Delhi").
    pub city: String,

    /// When the provider measured this observation (UTC).
    pub timestamp: DateTime<Utc>,

    /// Temperature in the provider's configured unit.
    pub temperature: f64,

    /// Categorical condition code (e.g. "Clear", "Rain").
    pub condition: String,

    /// Opaque display token supplied by the provider (e.g. "01d").
    pub icon: String,
}

/// The aggregate for one city over one finished window.
///
/// Created at window finalization and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    /// City identifier.
    pub city: String,

    /// Calendar date (UTC) of the window start.
    pub date: NaiveDate,

    /// Mean temperature over all samples in the window.
    pub avg_temp: f64,

    /// Highest temperature observed.
    pub max_temp: f64,

    /// Lowest temperature observed.
    pub min_temp: f64,

    /// Most frequent condition; ties go to the condition seen first.
    pub dominant_condition: String,

    /// Icon of the latest observation carrying the dominant condition.
    pub icon: String,

    /// Number of observations folded into this summary.
    pub sample_count: u32,
}

/// The observation field a threshold is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Temperature,
}

impl Metric {
    /// Extract this metric's value from an observation.
    pub fn value_of(&self, observation: &Observation) -> f64 {
        match self {
            Metric::Temperature => observation.temperature,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temperature" | "temp" => Ok(Metric::Temperature),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How an observed value is compared with a threshold value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    GreaterThan,
    LessThan,
}

impl Comparator {
    /// True when `value` breaches `threshold` under this comparator.
    pub fn breached(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::GreaterThan => value > threshold,
            Comparator::LessThan => value < threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::GreaterThan => ">",
            Comparator::LessThan => "<",
        }
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" | "gt" | "greater_than" => Ok(Comparator::GreaterThan),
            "<" | "lt" | "less_than" => Ok(Comparator::LessThan),
            other => Err(format!("unknown comparator: {other}")),
        }
    }
}

/// A configured alert rule.
///
/// Fires once when `consecutive` samples in a row breach the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub metric: Metric,
    pub comparator: Comparator,
    pub value: f64,

    /// Number of consecutive breaching samples required. Always >= 1.
    pub consecutive: u32,
}

impl AlertThreshold {
    pub fn validate(&self) -> Result<(), String> {
        if self.consecutive < 1 {
            return Err(format!("threshold '{self}' needs a breach count of at least 1"));
        }
        if !self.value.is_finite() {
            return Err(format!("threshold '{self}' has a non-finite value"));
        }
        Ok(())
    }
}

/// Parses `metric<op>value[:count]`, e.g. `temperature>35:2` or `temp<5`.
impl FromStr for AlertThreshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let op_pos = s
            .find(['>', '<'])
            .ok_or_else(|| format!("threshold '{s}' is missing a comparator"))?;

        let metric: Metric = s[..op_pos].parse()?;
        let comparator: Comparator = s[op_pos..op_pos + 1].parse()?;

        let rest = &s[op_pos + 1..];
        let (value, count) = match rest.split_once(':') {
            Some((value, count)) => (value, Some(count)),
            None => (rest, None),
        };

        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| format!("threshold '{s}' has an invalid value"))?;
        let consecutive = match count {
            Some(count) => count
                .trim()
                .parse()
                .map_err(|_| format!("threshold '{s}' has an invalid breach count"))?,
            None => 1,
        };

        let threshold = AlertThreshold {
            metric,
            comparator,
            value,
            consecutive,
        };
        threshold.validate()?;
        Ok(threshold)
    }
}

impl fmt::Display for AlertThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}:{}",
            self.metric,
            self.comparator.symbol(),
            self.value,
            self.consecutive
        )
    }
}

/// An alert raised when a breach streak reaches its configured length.
///
/// Append-only: alerts are never updated and survive window finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// City the alert refers to.
    pub city: String,

    /// Human-readable description.
    pub message: String,

    /// Timestamp of the observation that completed the streak.
    pub timestamp: DateTime<Utc>,

    /// Metric that breached.
    pub metric: Metric,

    /// Observed value that completed the streak.
    pub value: f64,

    /// Threshold value that was crossed.
    pub threshold: f64,
}

/// Query parameters for GET /alerts/recent endpoint.
#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    /// Maximum number of alerts to return (default: 20).
    #[serde(default = "default_alert_limit")]
    pub limit: u32,
}

fn default_alert_limit() -> u32 {
    20
}
