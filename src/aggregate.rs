//! Multi-device comparison over a time range.
//!
//! [`compare`] answers "show me metric X for devices A and B" either as raw
//! points or, when the caller asks for `num_buckets` and there is enough data,
//! averaged into fixed-width buckets:
//!
//! - `bucket_size = max(1, floor((end - start) / num_buckets))` seconds
//! - a row at `ts` lands in bucket `floor((ts - start) / bucket_size)`
//! - each bucket reports the earliest raw timestamp it holds and the mean
//!   of the non-null metric values
//!
//! Asking for more buckets than there are raw rows is not an error: the raw
//! series is returned with an advisory warning instead.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::QueryError;
use crate::models::{Bucket, DeviceId, Metric, Point, Reading};
use crate::store::{SeriesStore, TimeWindow};

// ---

/// Parameters of one comparison.
#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    pub device_a: DeviceId,
    pub device_b: Option<DeviceId>,
    pub metric: Metric,
    pub window: TimeWindow,
    pub num_buckets: Option<u32>,
}

impl ComparisonRequest {
    fn devices(&self) -> Vec<DeviceId> {
        let mut devices = vec![self.device_a];
        devices.extend(self.device_b.filter(|b| *b != self.device_a));
        devices
    }
}

/// One device's series, raw or bucketed. Serializes as a plain JSON array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Series {
    Raw(Vec<Point>),
    Bucketed(Vec<Bucket>),
}

impl Series {
    pub fn len(&self) -> usize {
        match self {
            Series::Raw(points) => points.len(),
            Series::Bucketed(buckets) => buckets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub series_a: Series,
    pub series_b: Series,
    /// Bucket width in seconds, `None` for raw series.
    pub bucket_size: Option<i64>,
    pub warning: Option<String>,
}

/// Bucket width in seconds for `num_buckets` buckets over `[start, end]`.
pub fn bucket_size(start: DateTime<Utc>, end: DateTime<Utc>, num_buckets: u32) -> i64 {
    let span = (end - start).num_seconds();
    span.div_euclid(i64::from(num_buckets.max(1))).max(1)
}

/// Index of the bucket `ts` falls into.
pub fn bucket_index(ts: DateTime<Utc>, start: DateTime<Utc>, bucket_size: i64) -> i64 {
    (ts - start).num_seconds().div_euclid(bucket_size)
}

/// Average one device's rows into buckets anchored at `start`.
///
/// Buckets come back ordered by index, which is also start-timestamp order.
pub fn bucketize(
    rows: &[Reading],
    metric: Metric,
    start: DateTime<Utc>,
    bucket_size: i64,
) -> Vec<Bucket> {
    // ---
    #[derive(Default)]
    struct Acc {
        first: Option<DateTime<Utc>>,
        sum: f64,
        values: u32,
        rows: u32,
    }

    let mut acc: BTreeMap<i64, Acc> = BTreeMap::new();
    for row in rows {
        let slot = acc
            .entry(bucket_index(row.timestamp, start, bucket_size))
            .or_default();
        slot.first = Some(slot.first.map_or(row.timestamp, |f| f.min(row.timestamp)));
        slot.rows += 1;
        if let Some(v) = row.value(metric) {
            slot.sum += v;
            slot.values += 1;
        }
    }

    acc.into_values()
        .filter_map(|a| {
            Some(Bucket {
                start_timestamp: a.first?,
                average_value: (a.values > 0).then(|| a.sum / f64::from(a.values)),
                raw_count: a.rows,
            })
        })
        .collect()
}

fn raw_points(rows: &[Reading], device_id: DeviceId, metric: Metric) -> Vec<Point> {
    rows.iter()
        .filter(|r| r.device_id == device_id)
        .map(|r| Point {
            timestamp: r.timestamp,
            value: r.value(metric),
        })
        .collect()
}

/// Compare one metric across up to two devices.
pub async fn compare(
    store: &dyn SeriesStore,
    request: &ComparisonRequest,
) -> Result<Comparison, QueryError> {
    // ---
    let timer = Instant::now();
    let metric = request.metric;

    if request.num_buckets == Some(0) {
        return Err(QueryError::InvalidRequest(
            "number of buckets must be at least 1".into(),
        ));
    }
    if let (Some(start), Some(end)) = (request.window.start, request.window.end) {
        if start > end {
            return Err(QueryError::InvalidRequest(
                "start timestamp must not be after end timestamp".into(),
            ));
        }
    }

    let devices = request.devices();
    let total_raw_entries = store.count_in_window(&devices, request.window).await?;
    debug!(?devices, total_raw_entries, num_buckets = ?request.num_buckets, "Counted raw entries");

    let num_buckets = match request.num_buckets {
        Some(n) if i64::from(n) <= total_raw_entries => n,
        requested => {
            let rows = store.readings_in_window(&devices, request.window).await?;
            let warning = requested.map(|n| {
                format!(
                    "Warning: The number of buckets ({n}) exceeds the total number of raw entries ({total_raw_entries})."
                )
            });

            info!(
                %metric,
                rows = rows.len(),
                warned = warning.is_some(),
                duration_ms = timer.elapsed().as_millis() as u64,
                "Comparison served raw"
            );
            return Ok(Comparison {
                series_a: Series::Raw(raw_points(&rows, request.device_a, metric)),
                series_b: Series::Raw(match request.device_b {
                    Some(b) => raw_points(&rows, b, metric),
                    None => Vec::new(),
                }),
                bucket_size: None,
                warning,
            });
        }
    };

    let (start, end) = match (request.window.start, request.window.end) {
        (Some(start), Some(end)) => (start, end),
        (start, end) => {
            let (first, last) = store.span(&devices).await?.ok_or_else(|| {
                QueryError::InvalidRequest("no data found for the requested devices".into())
            })?;
            (start.unwrap_or(first), end.unwrap_or(last))
        }
    };

    let size = bucket_size(start, end, num_buckets);
    let rows = store
        .readings_in_window(&devices, TimeWindow::new(Some(start), Some(end)))
        .await?;

    let series_for = |device_id: DeviceId| {
        let own: Vec<Reading> = rows
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect();
        bucketize(&own, metric, start, size)
    };

    let series_a = series_for(request.device_a);
    let series_b = request.device_b.map(series_for).unwrap_or_default();

    info!(
        %metric,
        bucket_size = size,
        num_buckets,
        buckets_a = series_a.len(),
        buckets_b = series_b.len(),
        duration_ms = timer.elapsed().as_millis() as u64,
        "Comparison served bucketed"
    );
    Ok(Comparison {
        series_a: Series::Bucketed(series_a),
        series_b: Series::Bucketed(series_b),
        bucket_size: Some(size),
        warning: None,
    })
}
