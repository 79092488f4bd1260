//! Per-device reads: the raw series and the newest reading.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{epoch_param, ApiError, AppState};
use crate::models::{DeviceId, Metric};
use crate::store::TimeWindow;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/devices/{device_id}/data", get(device_data))
        .route("/api/devices/{device_id}/latest", get(device_latest))
}

/// Query parameters for `/api/devices/{id}/data`.
#[derive(Debug, Deserialize)]
pub struct DataQuery {
    metric: Option<String>,
    /// Epoch seconds, inclusive
    start: Option<i64>,
    end: Option<i64>,
}

async fn ensure_device(state: &AppState, device_id: DeviceId) -> Result<(), ApiError> {
    // ---
    if device_id <= 0 {
        return Err(ApiError::BadRequest(
            "device_id must be a positive integer.".into(),
        ));
    }
    if !state.series.device_exists(device_id).await? {
        return Err(ApiError::NotFound(format!(
            "Device with ID {device_id} does not exist."
        )));
    }
    Ok(())
}

async fn device_data(
    Path(device_id): Path<DeviceId>,
    Query(params): Query<DataQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    // ---
    info!(device_id, ?params, "GET /api/devices/{{id}}/data");

    let metric = params
        .metric
        .as_deref()
        .map(str::parse::<Metric>)
        .transpose()?;
    let window = TimeWindow::new(
        epoch_param("start", params.start)?,
        epoch_param("end", params.end)?,
    );

    ensure_device(&state, device_id).await?;
    let rows = state.series.query(device_id, metric, window).await?;

    let message = rows.is_empty().then(|| {
        format!("No data available for device {device_id} in the specified range.")
    });
    info!(device_id, rows = rows.len(), "Device data served");

    Ok(Json(json!({
        "device_id": device_id,
        "start": params.start,
        "end": params.end,
        "status": "success",
        "data": rows,
        "message": message,
    })))
}

async fn device_latest(
    Path(device_id): Path<DeviceId>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    // ---
    ensure_device(&state, device_id).await?;

    let latest = state.series.latest(device_id).await?;
    let message = latest
        .is_none()
        .then(|| format!("No data available for device {device_id}."));

    Ok(Json(json!({
        "status": "success",
        "data": latest,
        "message": message,
    })))
}
