//! Weatherwatch - periodic weather collection, daily summaries and alerts.
//!
//! # Overview
//!
//! Weatherwatch polls a weather provider for a fixed set of cities, folds every
//! observation into a running per-city aggregate, and turns those aggregates
//! into daily summaries once per window. Each observation is also checked
//! against configured thresholds, raising an alert when a breach persists for
//! the configured number of consecutive readings.
//!
//! # Modules
//!
//! - [`model`]: Observations, summaries, thresholds and alerts
//! - [`aggregation`]: Per-city running aggregates and window rotation
//! - [`alerting`]: Edge-triggered threshold alerts
//! - [`scheduler`]: Independent periodic tasks with graceful shutdown
//! - [`monitor`]: The pipeline that ties everything together
//! - [`data_sources`]: Weather provider clients
//! - [`storage`]: SQLite persistence for summaries and alerts
//! - [`api`]: Read-only HTTP handlers
//! - [`config`]: Environment configuration

pub mod aggregation;
pub mod alerting;
pub mod api;
pub mod clock;
pub mod config;
pub mod data_sources;
pub mod error;
pub mod model;
pub mod monitor;
pub mod scheduler;
pub mod storage;
