//! Storage seams for the pipeline.
//!
//! Three traits cover everything the core persists:
//! - [`SeriesStore`]: the `(device_id, timestamp)` keyed time series
//! - [`CooldownStore`]: active alert suppression entries
//! - [`SettingsStore`]: threshold profiles and the alert recipient
//!
//! [`PgStore`] implements all three over PostgreSQL; [`MemoryStore`] is the
//! in-process equivalent used by tests and for running without a database.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::models::{
    CooldownKey, DeviceId, DeviceTimeRange, Metric, PartialMetrics, Reading, ThresholdProfile,
    UpsertOutcome,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Inclusive time bounds; a missing side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    // ---
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        TimeWindow { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

/// Outcome of an atomic "insert if absent" on a cooldown entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// No entry existed; this call created it.
    Inserted,
    /// An entry already existed and was left untouched.
    AlreadyActive,
}

#[async_trait]
pub trait SeriesStore: Send + Sync {
    // ---
    /// Insert or merge one reading in a single transaction.
    ///
    /// Fields that are `None` in `metrics` keep their stored value.
    async fn upsert(
        &self,
        device_id: DeviceId,
        timestamp: DateTime<Utc>,
        metrics: &PartialMetrics,
    ) -> Result<UpsertOutcome, StorageError>;

    /// All rows for one device inside `window`, oldest first. With a metric
    /// filter every other metric is cleared from the returned rows.
    async fn query(
        &self,
        device_id: DeviceId,
        metric: Option<Metric>,
        window: TimeWindow,
    ) -> Result<Vec<Reading>, StorageError>;

    async fn latest(&self, device_id: DeviceId) -> Result<Option<Reading>, StorageError>;

    async fn device_exists(&self, device_id: DeviceId) -> Result<bool, StorageError>;

    async fn time_ranges(&self) -> Result<Vec<DeviceTimeRange>, StorageError>;

    /// Number of rows belonging to any of `devices` inside `window`.
    async fn count_in_window(
        &self,
        devices: &[DeviceId],
        window: TimeWindow,
    ) -> Result<i64, StorageError>;

    /// Earliest and latest timestamp across `devices`, `None` without data.
    async fn span(
        &self,
        devices: &[DeviceId],
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, StorageError>;

    /// Rows for any of `devices` inside `window`, ordered by device then time.
    async fn readings_in_window(
        &self,
        devices: &[DeviceId],
        window: TimeWindow,
    ) -> Result<Vec<Reading>, StorageError>;
}

#[async_trait]
pub trait CooldownStore: Send + Sync {
    // ---
    /// Create the entry unless it exists; the return value is the dedup signal.
    async fn try_activate(
        &self,
        key: &CooldownKey,
        at: DateTime<Utc>,
    ) -> Result<Activation, StorageError>;

    /// Remove one entry. Returns whether it existed.
    async fn release(&self, key: &CooldownKey) -> Result<bool, StorageError>;

    /// Remove both severities for a device/metric. Returns rows removed.
    async fn clear(&self, device_id: DeviceId, metric: Metric) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    // ---
    async fn thresholds(&self) -> Result<BTreeMap<Metric, ThresholdProfile>, StorageError>;

    /// Store the given profiles, replacing existing ones for the same metrics.
    async fn save_thresholds(
        &self,
        profiles: &BTreeMap<Metric, ThresholdProfile>,
    ) -> Result<(), StorageError>;

    async fn alert_recipient(&self) -> Result<Option<String>, StorageError>;

    async fn set_alert_recipient(&self, email: &str) -> Result<(), StorageError>;
}
