//! HTTP gateway: each sibling module exports a subrouter, merged here.
//!
//! `main.rs` only calls [`router`]; it knows nothing about individual
//! endpoints.

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use chrono::{DateTime, Utc};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::alert::AlertEvaluator;
use crate::store::{SeriesStore, SettingsStore};

mod alerts;
mod comparison;
mod devices;
mod error;
mod health;
mod range;
mod thresholds;

pub use error::ApiError;

// ---

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub series: Arc<dyn SeriesStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub evaluator: Arc<AlertEvaluator>,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    // ---
    Router::new()
        .merge(devices::router())
        .merge(range::router())
        .merge(comparison::router())
        .merge(thresholds::router())
        .merge(alerts::router())
        .merge(health::router())
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    // ---
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Convert an optional epoch-seconds query parameter.
fn epoch_param(name: &str, secs: Option<i64>) -> Result<Option<DateTime<Utc>>, ApiError> {
    secs.map(|s| {
        DateTime::from_timestamp(s, 0)
            .ok_or_else(|| ApiError::BadRequest(format!("'{name}' is not a valid timestamp")))
    })
    .transpose()
}
