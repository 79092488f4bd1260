//! `GET /api/comparison`: one metric for up to two devices, raw or bucketed.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{epoch_param, ApiError, AppState};
use crate::aggregate::{self, ComparisonRequest, Series};
use crate::models::{DeviceId, Metric};
use crate::store::TimeWindow;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/comparison", get(compare))
}

#[derive(Debug, Deserialize)]
pub struct ComparisonQuery {
    device_1: Option<DeviceId>,
    device_2: Option<DeviceId>,
    metric: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
    buckets: Option<u32>,
}

fn check_device(label: &str, id: Option<DeviceId>) -> Result<(), ApiError> {
    match id {
        Some(id) if id <= 0 => Err(ApiError::BadRequest(format!(
            "{label} must be a positive integer."
        ))),
        _ => Ok(()),
    }
}

async fn compare(
    Query(params): Query<ComparisonQuery>,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    // ---
    info!(?params, "GET /api/comparison");

    let metric: Metric = params
        .metric
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Metric must be specified.".into()))?
        .parse()?;

    check_device("Device ID 1", params.device_1)?;
    check_device("Device ID 2", params.device_2)?;

    let start = epoch_param("start", params.start)?;
    let end = epoch_param("end", params.end)?;
    if let (Some(s), Some(e)) = (start, end) {
        if s >= e {
            return Err(ApiError::BadRequest(
                "Invalid time range: Start timestamp must be less than end timestamp.".into(),
            ));
        }
    }

    // With only device_2 given it takes the primary slot
    let (device_a, device_b, swapped) = match (params.device_1, params.device_2) {
        (Some(a), b) => (a, b, false),
        (None, Some(b)) => (b, None, true),
        (None, None) => {
            return Err(ApiError::BadRequest(
                "At least one device ID must be provided.".into(),
            ))
        }
    };

    let request = ComparisonRequest {
        device_a,
        device_b,
        metric,
        window: TimeWindow::new(start, end),
        num_buckets: params.buckets,
    };
    let result = aggregate::compare(state.series.as_ref(), &request).await?;

    let (series_1, series_2) = if swapped {
        (Series::Raw(Vec::new()), result.series_a)
    } else {
        (result.series_a, result.series_b)
    };

    let message = match result.warning {
        Some(warning) => Some(warning),
        None if series_1.is_empty() && series_2.is_empty() => {
            Some("No data found for the specified devices and metric.".to_string())
        }
        None => None,
    };

    Ok(Json(json!({
        "device_1": series_1,
        "device_2": series_2,
        "metric": metric,
        "start": params.start,
        "end": params.end,
        "bucket_size": result.bucket_size,
        "status": "success",
        "message": message,
    })))
}
