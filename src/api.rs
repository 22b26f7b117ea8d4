//! Read-only HTTP API over stored summaries and alerts.
//!
//! - **GET /summaries**: latest summary per city, newest first
//! - **GET /alerts/recent**: recent alerts, newest first
//! - **GET /health**: liveness
//!
//! Nothing here writes; the collection pipeline is the only writer.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::model::{Alert, AlertsQuery, DailySummary};
use crate::storage::SummaryStore;

/// Upper bound on `limit` for GET /alerts/recent.
const MAX_ALERT_LIMIT: u32 = 500;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SummaryStore>,
}

/// Build the router with all routes and the trace layer.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/summaries", get(get_summaries))
        .route("/alerts/recent", get(get_alerts))
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// GET /summaries - Latest daily summary per city.
///
/// # Response
///
/// ```json
/// [
///     {
///         "city": "Delhi",
///         "date": "2024-10-21",
///         "avg_temp": 31.4,
///         "max_temp": 35.2,
///         "min_temp": 27.9,
///         "dominant_condition": "Haze",
///         "icon": "50d",
///         "sample_count": 288
///     }
/// ]
/// ```
#[instrument(skip(state))]
pub async fn get_summaries(
    State(state): State<AppState>,
) -> Result<Json<Vec<DailySummary>>, StatusCode> {
    match state.store.latest_summaries().await {
        Ok(summaries) => {
            info!(count = summaries.len(), "Summaries queried");
            Ok(Json(summaries))
        }
        Err(e) => {
            warn!(error = %e, "Failed to load summaries");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /alerts/recent - Most recent alerts.
///
/// # Query Parameters
///
/// - `limit` (optional): Maximum number of alerts (default: 20, max: 500)
#[instrument(skip(state))]
pub async fn get_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<Alert>>, StatusCode> {
    if query.limit == 0 || query.limit > MAX_ALERT_LIMIT {
        warn!(limit = query.limit, "Alert limit out of range");
        return Err(StatusCode::BAD_REQUEST);
    }

    match state.store.list_alerts(query.limit).await {
        Ok(alerts) => {
            info!(count = alerts.len(), limit = query.limit, "Alerts queried");
            Ok(Json(alerts))
        }
        Err(e) => {
            warn!(limit = query.limit, error = %e, "Failed to load alerts");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
