//! Payload validation for inbound sensor messages.
//!
//! [`validate`] turns one `(topic, raw bytes)` pair into a single-metric
//! [`Reading`]. It is a pure function: rejections are returned as
//! [`IngestError`] and the caller decides how to log and drop them.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::IngestError;
use crate::models::{DeviceId, Metric, PartialMetrics, Reading};

// ---

/// `(category, sub_id)` topic suffixes and the metric each one carries.
const METRIC_TABLE: &[((&str, &str), Metric)] = &[
    (("ikea", "01"), Metric::Pollen),
    (("ikea", "02"), Metric::ParticulateMatter),
    (("temperature", "01"), Metric::Temperature),
    (("humidity", "01"), Metric::Humidity),
];

/// Resolve a topic like `<base>/<category>/<sub_id>` to its metric.
///
/// Only the last two segments are significant.
pub fn resolve_metric(topic: &str) -> Option<Metric> {
    // ---
    let mut parts = topic.rsplit('/');
    let sub_id = parts.next()?;
    let category = parts.next()?;

    METRIC_TABLE
        .iter()
        .find(|((c, s), _)| *c == category && *s == sub_id)
        .map(|(_, metric)| *metric)
}

/// Validate a raw message and build the reading it describes.
///
/// The returned reading carries exactly one metric; the other three stay
/// unset so a later upsert merges rather than overwrites them.
pub fn validate(topic: &str, raw: &[u8]) -> Result<Reading, IngestError> {
    // ---
    let metric = resolve_metric(topic).ok_or_else(|| IngestError::UnknownMetric {
        topic: topic.to_string(),
    })?;

    let payload: Value = serde_json::from_slice(raw)
        .map_err(|e| IngestError::PayloadInvalid(format!("body is not valid JSON: {e}")))?;
    let object = payload
        .as_object()
        .ok_or_else(|| IngestError::PayloadInvalid("body is not a JSON object".into()))?;

    let value = object.get("value").filter(|v| !v.is_null());
    let timestamp = object.get("timestamp").filter(|v| !v.is_null());
    let device_id = object
        .get("meta")
        .and_then(|meta| meta.get("device_id"))
        .filter(|v| !v.is_null());

    let mut missing = Vec::new();
    if device_id.is_none() {
        missing.push("device_id");
    }
    if timestamp.is_none() {
        missing.push("timestamp");
    }
    if value.is_none() {
        missing.push("value");
    }
    let (Some(value), Some(timestamp), Some(device_id)) = (value, timestamp, device_id) else {
        return Err(IngestError::PayloadInvalid(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    };

    let device_id = parse_device_id(device_id)?;
    let timestamp = parse_timestamp(timestamp)?;
    let metrics = parse_value(metric, value)?;

    Ok(Reading::new(device_id, timestamp, metrics))
}

fn parse_device_id(raw: &Value) -> Result<DeviceId, IngestError> {
    // ---
    raw.as_i64()
        .and_then(|id| DeviceId::try_from(id).ok())
        .ok_or_else(|| IngestError::PayloadInvalid(format!("invalid device_id: {raw}")))
}

/// Epoch seconds, sent as a JSON integer, a whole-valued float or a string
/// of digits.
fn parse_timestamp(raw: &Value) -> Result<DateTime<Utc>, IngestError> {
    // ---
    let secs = match raw {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .ok_or_else(|| IngestError::PayloadInvalid(format!("invalid timestamp: {raw}")))
}

fn parse_value(metric: Metric, raw: &Value) -> Result<PartialMetrics, IngestError> {
    // ---
    let number = raw.as_f64().ok_or_else(|| IngestError::SchemaMismatch {
        metric,
        reason: format!("non-numeric value {raw}"),
    })?;

    let (min, max) = metric.valid_range();
    if !(min..=max).contains(&number) {
        return Err(IngestError::OutOfRange {
            metric,
            value: number,
            min,
            max,
        });
    }

    let mut metrics = PartialMetrics::default();
    match metric {
        Metric::Temperature => metrics.temperature = Some(number),
        Metric::Humidity => metrics.humidity = Some(number),
        Metric::Pollen | Metric::ParticulateMatter => {
            if number.fract() != 0.0 {
                return Err(IngestError::SchemaMismatch {
                    metric,
                    reason: format!("non-integer value {number} for integer metric"),
                });
            }
            // Range check above bounds the value well inside i32
            let whole = number as i32;
            if metric == Metric::Pollen {
                metrics.pollen = Some(whole);
            } else {
                metrics.particulate_matter = Some(whole);
            }
        }
    }
    Ok(metrics)
}
