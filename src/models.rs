//! Data models for the sensor pipeline.
//!
//! Everything here is plain data: the metric catalogue, the stored reading,
//! query-time series points and buckets, and the threshold profile used by
//! the alert evaluator. Storage and HTTP code build on these types but the
//! types themselves know nothing about either.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

// ---

/// Devices are identified by the integer the firmware puts in `meta.device_id`.
pub type DeviceId = i32;

/// The four environmental metrics a device can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temperature,
    Humidity,
    Pollen,
    ParticulateMatter,
}

impl Metric {
    // ---
    pub const ALL: [Metric; 4] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::Pollen,
        Metric::ParticulateMatter,
    ];

    /// Column / wire name of the metric.
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Pollen => "pollen",
            Metric::ParticulateMatter => "particulate_matter",
        }
    }

    /// Integer metrics are stored as `INTEGER` and reject fractional values.
    pub fn is_integer(self) -> bool {
        matches!(self, Metric::Pollen | Metric::ParticulateMatter)
    }

    /// Closed interval of physically plausible values accepted at ingestion.
    pub fn valid_range(self) -> (f64, f64) {
        match self {
            Metric::Temperature => (0.0, 40.0),
            Metric::Humidity => (0.0, 100.0),
            Metric::Pollen => (0.0, 700.0),
            Metric::ParticulateMatter => (0.0, 1000.0),
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            Metric::Humidity => "%",
            Metric::Pollen | Metric::ParticulateMatter => "µg/m³",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| QueryError::UnknownMetric(s.to_string()))
    }
}

/// A partial set of metric values, as carried by one upsert.
///
/// `None` means "not part of this write", never "erase the stored value".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartialMetrics {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pollen: Option<i32>,
    pub particulate_matter: Option<i32>,
}

impl PartialMetrics {
    // ---
    /// Metrics carried by this write, in catalogue order.
    pub fn present(&self) -> Vec<Metric> {
        Metric::ALL
            .into_iter()
            .filter(|m| self.value(*m).is_some())
            .collect()
    }

    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::Humidity => self.humidity,
            Metric::Pollen => self.pollen.map(f64::from),
            Metric::ParticulateMatter => self.particulate_matter.map(f64::from),
        }
    }

    /// Fill every field missing here from `existing`.
    pub fn merged_over(&self, existing: &PartialMetrics) -> PartialMetrics {
        PartialMetrics {
            temperature: self.temperature.or(existing.temperature),
            humidity: self.humidity.or(existing.humidity),
            pollen: self.pollen.or(existing.pollen),
            particulate_matter: self.particulate_matter.or(existing.particulate_matter),
        }
    }
}

/// One timestamped, per-device record of up to four metrics.
///
/// Primary key is `(device_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Reading {
    // ---
    pub device_id: DeviceId,
    #[serde(rename = "unix_timestamp_seconds", with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pollen: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub particulate_matter: Option<i32>,
}

impl Reading {
    // ---
    pub fn new(device_id: DeviceId, timestamp: DateTime<Utc>, metrics: PartialMetrics) -> Self {
        Reading {
            device_id,
            timestamp,
            temperature: metrics.temperature,
            humidity: metrics.humidity,
            pollen: metrics.pollen,
            particulate_matter: metrics.particulate_matter,
        }
    }

    pub fn metrics(&self) -> PartialMetrics {
        PartialMetrics {
            temperature: self.temperature,
            humidity: self.humidity,
            pollen: self.pollen,
            particulate_matter: self.particulate_matter,
        }
    }

    /// Value of one metric widened to `f64`, `None` if unset.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        self.metrics().value(metric)
    }

    /// Copy of this reading with every metric other than `metric` cleared.
    pub fn only(&self, metric: Metric) -> Reading {
        // ---
        let m = self.metrics();
        let narrowed = PartialMetrics {
            temperature: m.temperature.filter(|_| metric == Metric::Temperature),
            humidity: m.humidity.filter(|_| metric == Metric::Humidity),
            pollen: m.pollen.filter(|_| metric == Metric::Pollen),
            particulate_matter: m
                .particulate_matter
                .filter(|_| metric == Metric::ParticulateMatter),
        };
        Reading::new(self.device_id, self.timestamp, narrowed)
    }
}

/// Result of one upsert call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub updated_fields: Vec<Metric>,
    pub rows_affected: u64,
}

/// A raw, unbucketed comparison point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

/// A fixed-width time window averaged into one value.
///
/// `start_timestamp` is the earliest raw timestamp that fell into the window,
/// not the window's nominal boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    #[serde(rename = "timestamp", with = "chrono::serde::ts_seconds")]
    pub start_timestamp: DateTime<Utc>,
    #[serde(rename = "value")]
    pub average_value: Option<f64>,
    #[serde(rename = "count")]
    pub raw_count: u32,
}

/// First and last timestamp a device has reported.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DeviceTimeRange {
    pub device_id: DeviceId,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub end: DateTime<Utc>,
}

/// Alert severity: `soft` for the yellow band, `hard` for the red band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Soft,
    Hard,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Soft => "soft",
            Severity::Hard => "hard",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two nested safe bands for one metric: `[red_low, red_high]` contains
/// `[yellow_low, yellow_high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdProfile {
    pub red_low: f64,
    pub yellow_low: f64,
    pub yellow_high: f64,
    pub red_high: f64,
}

impl ThresholdProfile {
    // ---
    /// Severity a value maps to, or `None` when it sits in the normal band.
    ///
    /// Band edges count as inside the band.
    pub fn classify(&self, value: f64) -> Option<Severity> {
        if value < self.red_low || value > self.red_high {
            Some(Severity::Hard)
        } else if value < self.yellow_low || value > self.yellow_high {
            Some(Severity::Soft)
        } else {
            None
        }
    }

    /// Verify `red_low < yellow_low < yellow_high < red_high`.
    pub fn check_ordering(&self) -> Result<(), String> {
        // ---
        let pairs = [
            ("redLow", self.red_low, "yellowLow", self.yellow_low),
            ("yellowLow", self.yellow_low, "yellowHigh", self.yellow_high),
            ("yellowHigh", self.yellow_high, "redHigh", self.red_high),
        ];
        for (lo_name, lo, hi_name, hi) in pairs {
            if !(lo < hi) {
                return Err(format!("'{lo_name}' must be less than '{hi_name}'"));
            }
        }
        Ok(())
    }
}

/// Identity of one suppression entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CooldownKey {
    pub device_id: DeviceId,
    pub metric: Metric,
    pub severity: Severity,
}
