//! Threshold alerting with consecutive-breach streaks.
//!
//! Alerts are edge-triggered: a (city, threshold) pair fires once when its
//! streak of breaching samples reaches the configured length, and cannot fire
//! again until a non-breaching sample resets the streak.
//!
//! Streaks are process-lifetime state and are not reset when a summary
//! window is finalized.

use std::collections::HashMap;

use crate::model::{Alert, AlertThreshold, Observation};

/// Key: (city, index into the configured thresholds)
type StreakKey = (String, usize);

pub struct AlertEngine {
    thresholds: Vec<AlertThreshold>,
    streaks: HashMap<StreakKey, u32>,
}

impl AlertEngine {
    pub fn new(thresholds: Vec<AlertThreshold>) -> Self {
        Self {
            thresholds,
            streaks: HashMap::new(),
        }
    }

    /// Current breach streak for a city against the threshold at `index`.
    pub fn streak(&self, city: &str, index: usize) -> u32 {
        self.streaks
            .get(&(city.to_string(), index))
            .copied()
            .unwrap_or(0)
    }

    /// Evaluate one observation against every threshold.
    ///
    /// Returns the alerts whose streak reached its required length on this
    /// sample.
    pub fn evaluate(&mut self, city: &str, observation: &Observation) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for (index, threshold) in self.thresholds.iter().enumerate() {
            let value = threshold.metric.value_of(observation);
            let key = (city.to_string(), index);

            if !threshold.comparator.breached(value, threshold.value) {
                if self.streaks.remove(&key).is_some() {
                    tracing::debug!(city, threshold = %threshold, "Breach streak reset");
                }
                continue;
            }

            let streak = self.streaks.entry(key).or_insert(0);
            *streak = streak.saturating_add(1);

            // Equality, not >=, so a long streak fires only once.
            if *streak == threshold.consecutive {
                tracing::info!(
                    city,
                    threshold = %threshold,
                    value,
                    streak = *streak,
                    "Alert threshold reached"
                );
                alerts.push(Alert {
                    city: city.to_string(),
                    message: alert_message(city, threshold, value),
                    timestamp: observation.timestamp,
                    metric: threshold.metric,
                    value,
                    threshold: threshold.value,
                });
            }
        }

        alerts
    }
}

/// Generate a human-readable alert message.
fn alert_message(city: &str, threshold: &AlertThreshold, value: f64) -> String {
    let readings = if threshold.consecutive == 1 {
        "reading".to_string()
    } else {
        format!("{} consecutive readings", threshold.consecutive)
    };
    format!(
        "{}: {} {:.1} {} {:.1} for {}",
        city,
        threshold.metric,
        value,
        threshold.comparator.symbol(),
        threshold.value,
        readings
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn obs(i: i64, temp: f64) -> Observation {
        Observation {
            city: "Chennai".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 10, 21, 12, 0, 0).unwrap()
                + chrono::Duration::minutes(i * 5),
            temperature: temp,
            condition: "Clear".to_string(),
            icon: "01d".to_string(),
        }
    }

    fn run(engine: &mut AlertEngine, temps: &[f64]) -> Vec<(usize, Alert)> {
        temps
            .iter()
            .enumerate()
            .flat_map(|(i, t)| {
                engine
                    .evaluate("Chennai", &obs(i as i64, *t))
                    .into_iter()
                    .map(move |a| (i, a))
            })
            .collect()
    }

    fn hot_engine() -> AlertEngine {
        AlertEngine::new(vec!["temperature>35:2".parse().unwrap()])
    }

    #[test]
    fn test_streak_fires_once() {
        let mut engine = hot_engine();
        let fired = run(&mut engine, &[36.0, 37.0, 38.0]);

        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, 1);
        assert_eq!(fired[0].1.value, 37.0);
        assert_eq!(fired[0].1.threshold, 35.0);
        assert_eq!(engine.streak("Chennai", 0), 3);
    }

    #[test]
    fn test_non_breach_resets_streak() {
        let mut engine = hot_engine();
        let fired = run(&mut engine, &[36.0, 30.0, 36.0, 37.0]);

        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, 3);
    }

    #[test]
    fn test_refires_after_reset() {
        let mut engine = hot_engine();
        let fired = run(&mut engine, &[36.0, 37.0, 20.0, 36.0, 37.0, 38.0]);

        let at: Vec<usize> = fired.iter().map(|(i, _)| *i).collect();
        assert_eq!(at, vec![1, 4]);
    }

    #[test]
    fn test_value_equal_to_threshold_is_not_breach() {
        let mut engine = hot_engine();
        assert!(run(&mut engine, &[35.0, 35.0, 35.0]).is_empty());
        assert_eq!(engine.streak("Chennai", 0), 0);
    }

    #[test]
    fn test_streaks_are_per_city() {
        let mut engine = hot_engine();
        let mut hot = obs(0, 40.0);

        assert!(engine.evaluate("Chennai", &hot).is_empty());
        hot.city = "Delhi".to_string();
        assert!(engine.evaluate("Delhi", &hot).is_empty());

        assert_eq!(engine.streak("Chennai", 0), 1);
        assert_eq!(engine.streak("Delhi", 0), 1);
    }

    #[test]
    fn test_independent_thresholds() {
        let mut engine = AlertEngine::new(vec![
            "temperature>35:2".parse().unwrap(),
            "temperature<10:1".parse().unwrap(),
        ]);

        let fired = run(&mut engine, &[5.0, 36.0, 37.0]);
        assert_eq!(fired.len(), 2);
        assert!(fired[0].1.message.contains("< 10.0"));
        assert!(fired[1].1.message.contains("2 consecutive readings"));
    }

    #[test]
    fn test_alert_message_format() {
        let threshold: AlertThreshold = "temperature>35:2".parse().unwrap();
        let message = alert_message("Delhi", &threshold, 36.0);
        assert_eq!(
            message,
            "Delhi: temperature 36.0 > 35.0 for 2 consecutive readings"
        );
    }
}
