//! Weatherwatch server.
//!
//! Runs the collection pipeline (fetch-and-fold plus finalize-and-reset) and
//! serves the read-only query API until Ctrl-C.
//!
//! # API Endpoints
//!
//! - `GET /summaries` - Latest daily summary per city
//! - `GET /alerts/recent` - Most recent alerts
//! - `GET /health` - Health check

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use weatherwatch::api::{AppState, router};
use weatherwatch::clock::SystemClock;
use weatherwatch::config::Config;
use weatherwatch::data_sources::OpenWeatherClient;
use weatherwatch::monitor::{Monitor, MonitorSchedule};
use weatherwatch::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("weatherwatch=info".parse()?))
        .init();

    let config = Config::from_env()?;

    info!(
        cities = ?config.cities,
        db_url = %config.database_url,
        thresholds = config.thresholds.len(),
        "Starting weatherwatch"
    );

    // Initialize storage
    let storage = Arc::new(Storage::new(&config.database_url).await?);
    info!("Database initialized");

    let source = Arc::new(OpenWeatherClient::new(
        &config.api_key,
        &config.units,
        config.request_timeout,
    )?);

    let monitor = Arc::new(Monitor::new(
        config.cities.clone(),
        config.thresholds.clone(),
        source,
        storage.clone(),
        Arc::new(SystemClock),
        config.max_concurrent_fetches,
    )?);

    let scheduler = monitor.start(MonitorSchedule::from(&config));

    let app = router(AppState { store: storage });

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Weatherwatch is listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    scheduler.shutdown().await;

    Ok(())
}
