use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use super::{ApiError, AppState};

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/range", get(time_ranges))
}

/// First and last reported timestamp for every device.
async fn time_ranges(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    // ---
    let ranges = state.series.time_ranges().await?;
    tracing::debug!(devices = ranges.len(), "Time ranges served");

    Ok(Json(json!({ "status": "success", "data": ranges })))
}
