use std::collections::BTreeMap;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::info;

use super::{ApiError, AppState};
use crate::models::{Metric, ThresholdProfile};

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/thresholds", get(list_thresholds).post(save_thresholds))
}

async fn list_thresholds(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    // ---
    let profiles = state.settings.thresholds().await?;
    let message = profiles
        .is_empty()
        .then_some("No thresholds configured.");

    Ok(Json(json!({
        "status": "success",
        "data": profiles,
        "message": message,
    })))
}

/// Replace the profiles for every metric present in the body.
///
/// Each profile must satisfy `redLow < yellowLow < yellowHigh < redHigh`;
/// one bad profile rejects the whole request.
async fn save_thresholds(
    State(state): State<AppState>,
    Json(profiles): Json<BTreeMap<Metric, ThresholdProfile>>,
) -> Result<Json<Value>, ApiError> {
    // ---
    if profiles.is_empty() {
        return Err(ApiError::BadRequest("No thresholds provided.".into()));
    }
    for (metric, profile) in &profiles {
        profile
            .check_ordering()
            .map_err(|reason| ApiError::BadRequest(format!("{metric}: {reason}")))?;
    }

    state.settings.save_thresholds(&profiles).await?;
    info!(metrics = profiles.len(), "Thresholds updated");

    Ok(Json(json!({
        "status": "success",
        "message": "Thresholds updated successfully.",
    })))
}
