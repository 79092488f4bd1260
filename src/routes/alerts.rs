//! Alert recipient management and on-demand alert evaluation.

use std::collections::BTreeMap;

use axum::{extract::State, routing::get, routing::post, Json, Router};
use lettre::Address;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{ApiError, AppState};
use crate::alert::AlertInput;
use crate::models::{DeviceId, Metric, ThresholdProfile};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/alert_email", get(get_recipient).post(set_recipient))
        .route("/api/send_alert_mail", post(send_alert))
}

#[derive(Debug, Deserialize)]
pub struct RecipientBody {
    email: String,
}

#[derive(Debug, Deserialize)]
pub struct AlertRequest {
    device: DeviceId,
    metric: Metric,
    value: f64,
    /// Falls back to the stored profile for `metric` when absent.
    thresholds: Option<ThresholdsArg>,
}

/// Either the profile for the requested metric, or profiles keyed by metric
/// (the shape `GET /api/thresholds` returns) from which the requested one is
/// picked.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ThresholdsArg {
    Single(ThresholdProfile),
    PerMetric(BTreeMap<Metric, ThresholdProfile>),
}

impl ThresholdsArg {
    fn for_metric(self, metric: Metric) -> Option<ThresholdProfile> {
        match self {
            ThresholdsArg::Single(profile) => Some(profile),
            ThresholdsArg::PerMetric(mut profiles) => profiles.remove(&metric),
        }
    }
}

async fn get_recipient(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    // ---
    let email = state.settings.alert_recipient().await?;
    Ok(Json(json!({ "status": "success", "email": email })))
}

async fn set_recipient(
    State(state): State<AppState>,
    Json(body): Json<RecipientBody>,
) -> Result<Json<Value>, ApiError> {
    // ---
    let email = body.email.trim();
    if email.parse::<Address>().is_err() {
        return Err(ApiError::BadRequest(format!(
            "'{email}' is not a valid email address."
        )));
    }

    state.settings.set_alert_recipient(email).await?;
    info!(email, "Alert recipient updated");

    Ok(Json(json!({
        "status": "success",
        "message": "Alert email updated successfully.",
    })))
}

async fn send_alert(
    State(state): State<AppState>,
    Json(req): Json<AlertRequest>,
) -> Result<Json<Value>, ApiError> {
    // ---
    if req.device <= 0 {
        return Err(ApiError::BadRequest(
            "device must be a positive integer.".into(),
        ));
    }
    if !req.value.is_finite() {
        return Err(ApiError::BadRequest("value must be a finite number.".into()));
    }

    let profile = match req.thresholds.and_then(|t| t.for_metric(req.metric)) {
        Some(profile) => profile,
        None => state
            .settings
            .thresholds()
            .await?
            .remove(&req.metric)
            .ok_or_else(|| {
                ApiError::BadRequest(format!("No thresholds configured for {}.", req.metric))
            })?,
    };

    let recipient = state.settings.alert_recipient().await?;
    let input = AlertInput {
        device_id: req.device,
        metric: req.metric,
        value: req.value,
        profile,
    };
    let outcome = state
        .evaluator
        .evaluate(&input, recipient.as_deref())
        .await?;

    Ok(Json(json!({
        "status": "success",
        "message": outcome.message(),
    })))
}
