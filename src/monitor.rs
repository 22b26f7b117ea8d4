//! Pipeline orchestration.
//!
//! A [`Monitor`] owns the monitored cities and wires the weather source, the
//! accumulator, the alert engine and the summary store together. It exposes
//! the two scheduled operations:
//!
//! - [`Monitor::fetch_and_fold`]: fetch every city concurrently, fold each
//!   observation into the open window and evaluate alerts
//! - [`Monitor::finalize_window`]: close the open window, turn each city's
//!   aggregate into a summary and swap the stored summary set
//!
//! Window rotation swaps the aggregate map under the accumulator lock, so a
//! fold always lands entirely in one window and is never lost or counted
//! twice.

use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::aggregation::{Accumulator, CityAggregate};
use crate::alerting::AlertEngine;
use crate::clock::Clock;
use crate::config::Config;
use crate::data_sources::WeatherSource;
use crate::error::{FetchError, MonitorError};
use crate::model::{Alert, AlertThreshold, DailySummary, Observation};
use crate::scheduler::{Schedule, Scheduler, SchedulerHandle, task_fn};
use crate::storage::SummaryStore;

/// Outcome of one fetch-and-fold tick.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    /// Cities whose observation was folded.
    pub fetched: Vec<String>,

    /// Cities whose fetch failed this tick.
    pub failed: Vec<String>,

    /// Alerts raised during this tick.
    pub alerts: Vec<Alert>,
}

/// Outcome of one window finalization.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FinalizeReport {
    /// Summaries written to the store.
    pub persisted: Vec<DailySummary>,

    /// Cities that had no observations in the closed window.
    pub empty_cities: Vec<String>,

    /// Summaries held back after a store failure, retried next time.
    pub pending: Vec<DailySummary>,
}

/// Cadence settings for [`Monitor::start`].
#[derive(Debug, Clone, Copy)]
pub struct MonitorSchedule {
    pub fetch_interval: Duration,
    pub summary_window: Duration,
    pub shutdown_grace: Duration,
}

impl From<&Config> for MonitorSchedule {
    fn from(config: &Config) -> Self {
        Self {
            fetch_interval: config.fetch_interval,
            summary_window: config.summary_window,
            shutdown_grace: config.shutdown_grace,
        }
    }
}

pub struct Monitor {
    cities: Vec<String>,
    source: Arc<dyn WeatherSource>,
    store: Arc<dyn SummaryStore>,
    clock: Arc<dyn Clock>,
    accumulator: Accumulator,
    alerts: Mutex<AlertEngine>,
    // Finalized summaries whose swap failed.
    pending: Mutex<Vec<DailySummary>>,
    // Raised alerts whose write failed.
    pending_alerts: Mutex<Vec<Alert>>,
    // Serializes finalizations with each other.
    finalizing: tokio::sync::Mutex<()>,
    fetch_permits: Arc<Semaphore>,
}

impl Monitor {
    /// Build a monitor with an open window starting now.
    pub fn new(
        cities: Vec<String>,
        thresholds: Vec<AlertThreshold>,
        source: Arc<dyn WeatherSource>,
        store: Arc<dyn SummaryStore>,
        clock: Arc<dyn Clock>,
        max_concurrent_fetches: usize,
    ) -> Result<Self, MonitorError> {
        if cities.is_empty() {
            return Err(MonitorError::ConfigInvalid(
                "at least one city must be configured".into(),
            ));
        }
        if max_concurrent_fetches == 0 {
            return Err(MonitorError::ConfigInvalid(
                "max concurrent fetches must be positive".into(),
            ));
        }
        for threshold in &thresholds {
            threshold.validate().map_err(MonitorError::ConfigInvalid)?;
        }

        let accumulator = Accumulator::new(&cities, clock.now());

        Ok(Self {
            cities,
            source,
            store,
            clock,
            accumulator,
            alerts: Mutex::new(AlertEngine::new(thresholds)),
            pending: Mutex::new(Vec::new()),
            pending_alerts: Mutex::new(Vec::new()),
            finalizing: tokio::sync::Mutex::new(()),
            fetch_permits: Arc::new(Semaphore::new(max_concurrent_fetches)),
        })
    }

    /// Copy of a city's aggregate in the open window.
    pub fn aggregate(&self, city: &str) -> Option<CityAggregate> {
        self.accumulator.snapshot(city)
    }

    /// Summaries waiting to be retried after a store failure.
    pub fn pending_summaries(&self) -> Vec<DailySummary> {
        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Alerts waiting to be written after a store failure.
    pub fn pending_alerts(&self) -> Vec<Alert> {
        self.pending_alerts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Fetch every city once and fold the results into the open window.
    ///
    /// A failure for one city is logged and skipped; it never prevents the
    /// other cities from being folded. There is no retry within a tick.
    ///
    /// Alerts that could not be written on an earlier tick are written
    /// again before this tick's alerts.
    pub async fn fetch_and_fold(&self) -> TickReport {
        let mut fetches = JoinSet::new();

        for city in &self.cities {
            let city = city.clone();
            let source = Arc::clone(&self.source);
            let permits = Arc::clone(&self.fetch_permits);

            fetches.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => source.fetch(&city).await,
                    Err(_) => Err(FetchError::Provider("fetch permits closed".into())),
                };
                (city, result)
            });
        }

        let mut report = TickReport::default();

        while let Some(joined) = fetches.join_next().await {
            let (city, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Fetch task panicked");
                    continue;
                }
            };

            match result {
                Ok(observation) => {
                    let alerts = self.ingest(&city, observation);
                    report.fetched.push(city);
                    report.alerts.extend(alerts);
                }
                Err(source) => {
                    let err = MonitorError::SourceUnavailable {
                        city: city.clone(),
                        source,
                    };
                    warn!(city = %city, error = %err, "Skipping city this tick");
                    report.failed.push(city);
                }
            }
        }

        let mut unsaved = {
            let mut queued = self.pending_alerts.lock().unwrap_or_else(|p| p.into_inner());
            mem::take(&mut *queued)
        };
        unsaved.extend(report.alerts.iter().cloned());
        self.persist_alerts(unsaved).await;

        info!(
            fetched = report.fetched.len(),
            failed = report.failed.len(),
            alerts = report.alerts.len(),
            "Fetch tick complete"
        );
        report
    }

    /// Write alerts to the log. Any that fail are queued for the next tick.
    async fn persist_alerts(&self, alerts: Vec<Alert>) {
        let mut failed = Vec::new();
        for alert in alerts {
            if let Err(e) = self.store.upsert_alert(&alert).await {
                error!(
                    city = %alert.city,
                    error = %e,
                    "Failed to persist alert; will retry next tick"
                );
                failed.push(alert);
            }
        }

        if !failed.is_empty() {
            self.pending_alerts
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .extend(failed);
        }
    }

    /// Fold one observation under the monitored city name and evaluate it
    /// against the alert thresholds.
    fn ingest(&self, city: &str, mut observation: Observation) -> Vec<Alert> {
        if observation.city != city {
            debug!(city, reported = %observation.city, "Provider renamed city");
            observation.city = city.to_string();
        }
        debug!(
            city,
            temperature = observation.temperature,
            condition = %observation.condition,
            "Folding observation"
        );
        if !self.accumulator.fold(city, &observation) {
            warn!(city, "Observation for untracked city dropped");
            return Vec::new();
        }
        self.alerts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .evaluate(city, &observation)
    }

    /// Close the open window and publish its summaries.
    ///
    /// Summaries are built in memory first; the stored set is only swapped
    /// once they all exist. If the swap fails the summaries are kept and
    /// included in the next finalization.
    pub async fn finalize_window(&self) -> FinalizeReport {
        let _serial = self.finalizing.lock().await;

        let closed = self.accumulator.rotate(self.clock.now());

        let mut report = FinalizeReport::default();
        let mut summaries = Vec::with_capacity(closed.len());
        for aggregate in &closed {
            match aggregate.finalize() {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    info!(city = %aggregate.city, reason = %e, "Omitting summary");
                    report.empty_cities.push(aggregate.city.clone());
                }
            }
        }

        let retried = {
            let mut queued = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            mem::take(&mut *queued)
        };
        let summaries = merge_pending(retried, summaries);

        if summaries.is_empty() {
            info!("No summaries produced; keeping stored summaries");
            return report;
        }

        match self.store.replace_summaries(&summaries).await {
            Ok(()) => {
                info!(count = summaries.len(), "Daily summaries published");
                report.persisted = summaries;
            }
            Err(e) => {
                let err = MonitorError::StoreFailure(e);
                error!(
                    error = %err,
                    count = summaries.len(),
                    "Failed to publish summaries; will retry at next finalization"
                );
                *self.pending.lock().unwrap_or_else(|p| p.into_inner()) = summaries.clone();
                report.pending = summaries;
            }
        }

        report
    }

    /// Register both periodic tasks and start them.
    ///
    /// Fetching starts immediately; the first finalization happens one
    /// window after start.
    pub fn start(self: Arc<Self>, schedule: MonitorSchedule) -> SchedulerHandle {
        let mut scheduler = Scheduler::new(schedule.shutdown_grace);

        let monitor = Arc::clone(&self);
        scheduler.register(
            task_fn("fetch-and-fold", move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    monitor.fetch_and_fold().await;
                    Ok(())
                }
            }),
            Schedule::every(schedule.fetch_interval),
        );

        let monitor = Arc::clone(&self);
        scheduler.register(
            task_fn("finalize-and-reset", move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    monitor.finalize_window().await;
                    Ok(())
                }
            }),
            Schedule::every(schedule.summary_window).starting_after(schedule.summary_window),
        );

        info!(
            cities = self.cities.len(),
            fetch_interval_secs = schedule.fetch_interval.as_secs(),
            summary_window_secs = schedule.summary_window.as_secs(),
            "Monitor started"
        );
        scheduler.start()
    }
}

/// Combine retried summaries with fresh ones; fresh rows win on (city, date).
fn merge_pending(retried: Vec<DailySummary>, fresh: Vec<DailySummary>) -> Vec<DailySummary> {
    let mut merged: Vec<DailySummary> = retried
        .into_iter()
        .filter(|old| {
            !fresh
                .iter()
                .any(|new| new.city == old.city && new.date == old.date)
        })
        .collect();
    merged.extend(fresh);
    merged.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.city.cmp(&b.city)));
    merged
}
