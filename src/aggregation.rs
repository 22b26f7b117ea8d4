//! Rolling per-city aggregation and window rotation.
//!
//! A [`CityAggregate`] keeps just enough state (count, sum, min, max and a
//! condition histogram) to produce a [`DailySummary`] without re-reading any
//! history. The [`Accumulator`] owns one aggregate per city for the current
//! window and swaps the whole map out atomically when the window closes.

use std::collections::HashMap;
use std::mem;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::MonitorError;
use crate::model::{DailySummary, Observation};

/// Occurrences of one condition code within a window.
#[derive(Debug, Clone, PartialEq)]
struct ConditionTally {
    condition: String,
    count: u32,
    /// Icon of the most recently folded observation with this condition.
    latest_icon: String,
}

/// Running aggregate for one city over one window.
///
/// `min`/`max` are absent until the first fold. Whenever `count > 0`,
/// `min <= sum / count <= max` holds.
#[derive(Debug, Clone, PartialEq)]
pub struct CityAggregate {
    pub city: String,
    pub window_start: DateTime<Utc>,
    pub count: u32,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    // First-seen order is kept so ties resolve to the earliest condition.
    conditions: Vec<ConditionTally>,
}

impl CityAggregate {
    /// An empty aggregate for `city` starting at `window_start`.
    pub fn new(city: &str, window_start: DateTime<Utc>) -> Self {
        Self {
            city: city.to_string(),
            window_start,
            count: 0,
            sum: 0.0,
            min: None,
            max: None,
            conditions: Vec::new(),
        }
    }

    /// Incorporate one observation.
    pub fn fold(&mut self, observation: &Observation) {
        let temp = observation.temperature;

        self.count += 1;
        self.sum += temp;
        self.min = Some(self.min.map_or(temp, |m| m.min(temp)));
        self.max = Some(self.max.map_or(temp, |m| m.max(temp)));

        match self
            .conditions
            .iter_mut()
            .find(|t| t.condition == observation.condition)
        {
            Some(tally) => {
                tally.count += 1;
                tally.latest_icon = observation.icon.clone();
            }
            None => self.conditions.push(ConditionTally {
                condition: observation.condition.clone(),
                count: 1,
                latest_icon: observation.icon.clone(),
            }),
        }
    }

    /// Consuming variant of [`fold`](Self::fold).
    pub fn folded(mut self, observation: &Observation) -> Self {
        self.fold(observation);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean temperature, or `None` for an empty aggregate.
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }

    /// Number of times `condition` was folded in this window.
    pub fn condition_count(&self, condition: &str) -> u32 {
        self.conditions
            .iter()
            .find(|t| t.condition == condition)
            .map_or(0, |t| t.count)
    }

    fn dominant(&self) -> Option<&ConditionTally> {
        // Strictly greater keeps the earliest tally on ties.
        self.conditions.iter().fold(None, |best, tally| match best {
            Some(b) if b.count >= tally.count => Some(b),
            _ => Some(tally),
        })
    }

    /// Project this aggregate into a summary.
    ///
    /// Returns [`MonitorError::EmptyWindow`] when nothing was folded.
    pub fn finalize(&self) -> Result<DailySummary, MonitorError> {
        let empty = || MonitorError::EmptyWindow {
            city: self.city.clone(),
            window_start: self.window_start,
        };

        let (Some(avg_temp), Some(min_temp), Some(max_temp), Some(dominant)) =
            (self.average(), self.min, self.max, self.dominant())
        else {
            return Err(empty());
        };

        // Float rounding can push the mean a hair outside [min, max].
        let avg_temp = avg_temp.clamp(min_temp, max_temp);

        Ok(DailySummary {
            city: self.city.clone(),
            date: self.window_start.date_naive(),
            avg_temp,
            max_temp,
            min_temp,
            dominant_condition: dominant.condition.clone(),
            icon: dominant.latest_icon.clone(),
            sample_count: self.count,
        })
    }

    /// An empty aggregate for the same city starting a new window.
    pub fn reset(&self, window_start: DateTime<Utc>) -> Self {
        Self::new(&self.city, window_start)
    }
}

/// The set of aggregates for the current window, keyed by city.
#[derive(Debug)]
struct Window {
    start: DateTime<Utc>,
    cities: HashMap<String, CityAggregate>,
}

/// Owns the per-city aggregates of the open window.
///
/// Folding and rotation take the same lock, so a fold lands either wholly in
/// the window being closed or wholly in the next one. The lock is never held
/// across an await point.
#[derive(Debug)]
pub struct Accumulator {
    window: Mutex<Window>,
}

impl Accumulator {
    /// Start an open window at `window_start` with an empty aggregate per city.
    pub fn new<I, S>(cities: I, window_start: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cities = cities
            .into_iter()
            .map(|c| {
                let city = c.as_ref();
                (city.to_string(), CityAggregate::new(city, window_start))
            })
            .collect();

        Self {
            window: Mutex::new(Window {
                start: window_start,
                cities,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        // Folds never panic mid-update, so a poisoned guard still holds
        // consistent aggregates.
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fold an observation into `city`'s aggregate for the open window.
    ///
    /// The key is the monitored city name, not whatever spelling the provider
    /// put in the observation. Returns `false` and folds nothing when `city`
    /// is not tracked; the tracked set never grows after construction.
    pub fn fold(&self, city: &str, observation: &Observation) -> bool {
        let mut window = self.lock();
        match window.cities.get_mut(city) {
            Some(aggregate) => {
                aggregate.fold(observation);
                true
            }
            None => false,
        }
    }

    /// Close the open window and start a new one at `next_start`.
    ///
    /// Returns the closed window's aggregates in city order. The new window
    /// keeps the same set of cities, each with an empty aggregate.
    pub fn rotate(&self, next_start: DateTime<Utc>) -> Vec<CityAggregate> {
        let mut window = self.lock();
        let fresh = window
            .cities
            .values()
            .map(|agg| (agg.city.clone(), agg.reset(next_start)))
            .collect();
        window.start = next_start;
        let closed = mem::replace(&mut window.cities, fresh);
        drop(window);

        let mut closed: Vec<CityAggregate> = closed.into_values().collect();
        closed.sort_by(|a, b| a.city.cmp(&b.city));
        closed
    }

    /// Copy of a city's aggregate in the open window.
    pub fn snapshot(&self, city: &str) -> Option<CityAggregate> {
        self.lock().cities.get(city).cloned()
    }

    /// Start of the open window.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.lock().start
    }
}
