//! Liveness endpoint.
//!
//! `/health` is used by container orchestrators and CI to check that the
//! process answers HTTP. It never touches the database or the broker, so a
//! storage outage does not make the service look dead.

use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
    timestamp: i64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "sensorwatch is running",
        timestamp: Utc::now().timestamp(),
    })
}

/// Subrouter with the single `GET /health` route.
///
/// Generic over the application state so it merges into any gateway router.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
