//! In-process store with the same semantics as the PostgreSQL one.
//!
//! Every operation takes a single lock for its whole duration, which gives
//! the same per-call atomicity the database provides through transactions
//! and `ON CONFLICT`.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Activation, CooldownStore, SeriesStore, SettingsStore, TimeWindow};
use crate::error::StorageError;
use crate::models::{
    CooldownKey, DeviceId, DeviceTimeRange, Metric, PartialMetrics, Reading, ThresholdProfile,
    UpsertOutcome,
};

// ---

#[derive(Debug, Default)]
struct Inner {
    readings: BTreeMap<(DeviceId, DateTime<Utc>), PartialMetrics>,
    cooldowns: BTreeMap<CooldownKey, DateTime<Utc>>,
    thresholds: BTreeMap<Metric, ThresholdProfile>,
    recipient: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a cooldown entry currently exists.
    pub async fn is_active(&self, key: &CooldownKey) -> bool {
        self.inner.lock().await.cooldowns.contains_key(key)
    }

    pub async fn reading_count(&self) -> usize {
        self.inner.lock().await.readings.len()
    }
}

#[async_trait]
impl SeriesStore for MemoryStore {
    // ---
    async fn upsert(
        &self,
        device_id: DeviceId,
        timestamp: DateTime<Utc>,
        metrics: &PartialMetrics,
    ) -> Result<UpsertOutcome, StorageError> {
        // ---
        let mut inner = self.inner.lock().await;
        let slot = inner.readings.entry((device_id, timestamp)).or_default();
        *slot = metrics.merged_over(slot);

        Ok(UpsertOutcome {
            updated_fields: metrics.present(),
            rows_affected: 1,
        })
    }

    async fn query(
        &self,
        device_id: DeviceId,
        metric: Option<Metric>,
        window: TimeWindow,
    ) -> Result<Vec<Reading>, StorageError> {
        // ---
        let inner = self.inner.lock().await;
        let rows = inner
            .readings
            .range((device_id, DateTime::<Utc>::MIN_UTC)..=(device_id, DateTime::<Utc>::MAX_UTC))
            .filter(|((_, ts), _)| window.contains(*ts))
            .map(|((id, ts), m)| Reading::new(*id, *ts, *m))
            .map(|r| match metric {
                Some(m) => r.only(m),
                None => r,
            })
            .collect();
        Ok(rows)
    }

    async fn latest(&self, device_id: DeviceId) -> Result<Option<Reading>, StorageError> {
        // ---
        let inner = self.inner.lock().await;
        Ok(inner
            .readings
            .range((device_id, DateTime::<Utc>::MIN_UTC)..=(device_id, DateTime::<Utc>::MAX_UTC))
            .next_back()
            .map(|((id, ts), m)| Reading::new(*id, *ts, *m)))
    }

    async fn device_exists(&self, device_id: DeviceId) -> Result<bool, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner.readings.keys().any(|(id, _)| *id == device_id))
    }

    async fn time_ranges(&self) -> Result<Vec<DeviceTimeRange>, StorageError> {
        // ---
        let inner = self.inner.lock().await;
        let mut ranges: Vec<DeviceTimeRange> = Vec::new();
        // Keys are ordered by device, then time
        for (id, ts) in inner.readings.keys() {
            match ranges.last_mut() {
                Some(last) if last.device_id == *id => last.end = *ts,
                _ => ranges.push(DeviceTimeRange {
                    device_id: *id,
                    start: *ts,
                    end: *ts,
                }),
            }
        }
        Ok(ranges)
    }

    async fn count_in_window(
        &self,
        devices: &[DeviceId],
        window: TimeWindow,
    ) -> Result<i64, StorageError> {
        // ---
        let inner = self.inner.lock().await;
        let count = inner
            .readings
            .keys()
            .filter(|(id, ts)| devices.contains(id) && window.contains(*ts))
            .count();
        Ok(count as i64)
    }

    async fn span(
        &self,
        devices: &[DeviceId],
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, StorageError> {
        // ---
        let inner = self.inner.lock().await;
        let stamps: BTreeSet<DateTime<Utc>> = inner
            .readings
            .keys()
            .filter(|(id, _)| devices.contains(id))
            .map(|(_, ts)| *ts)
            .collect();
        Ok(stamps.first().copied().zip(stamps.last().copied()))
    }

    async fn readings_in_window(
        &self,
        devices: &[DeviceId],
        window: TimeWindow,
    ) -> Result<Vec<Reading>, StorageError> {
        // ---
        let inner = self.inner.lock().await;
        Ok(inner
            .readings
            .iter()
            .filter(|((id, ts), _)| devices.contains(id) && window.contains(*ts))
            .map(|((id, ts), m)| Reading::new(*id, *ts, *m))
            .collect())
    }
}

#[async_trait]
impl CooldownStore for MemoryStore {
    // ---
    async fn try_activate(
        &self,
        key: &CooldownKey,
        at: DateTime<Utc>,
    ) -> Result<Activation, StorageError> {
        // ---
        let mut inner = self.inner.lock().await;
        if inner.cooldowns.contains_key(key) {
            return Ok(Activation::AlreadyActive);
        }
        inner.cooldowns.insert(*key, at);
        Ok(Activation::Inserted)
    }

    async fn release(&self, key: &CooldownKey) -> Result<bool, StorageError> {
        Ok(self.inner.lock().await.cooldowns.remove(key).is_some())
    }

    async fn clear(&self, device_id: DeviceId, metric: Metric) -> Result<u64, StorageError> {
        // ---
        let mut inner = self.inner.lock().await;
        let before = inner.cooldowns.len();
        inner
            .cooldowns
            .retain(|k, _| !(k.device_id == device_id && k.metric == metric));
        Ok((before - inner.cooldowns.len()) as u64)
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    // ---
    async fn thresholds(&self) -> Result<BTreeMap<Metric, ThresholdProfile>, StorageError> {
        Ok(self.inner.lock().await.thresholds.clone())
    }

    async fn save_thresholds(
        &self,
        profiles: &BTreeMap<Metric, ThresholdProfile>,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.thresholds.extend(profiles.iter().map(|(m, p)| (*m, *p)));
        Ok(())
    }

    async fn alert_recipient(&self) -> Result<Option<String>, StorageError> {
        Ok(self.inner.lock().await.recipient.clone())
    }

    async fn set_alert_recipient(&self, email: &str) -> Result<(), StorageError> {
        self.inner.lock().await.recipient = Some(email.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::Severity;
    use chrono::TimeZone;
    use tokio_test::assert_ok;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn temperature(v: f64) -> PartialMetrics {
        PartialMetrics {
            temperature: Some(v),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        // ---
        let store = MemoryStore::new();
        let full = PartialMetrics {
            temperature: Some(21.0),
            humidity: Some(55.0),
            pollen: Some(4),
            particulate_matter: Some(17),
        };

        assert_ok!(store.upsert(1, ts(100), &full).await);
        assert_ok!(store.upsert(1, ts(100), &full).await);

        let rows = store.query(1, None, TimeWindow::default()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metrics(), full);
    }

    #[tokio::test]
    async fn test_upsert_merges_partial_writes() {
        // ---
        let store = MemoryStore::new();
        store.upsert(1, ts(100), &temperature(5.0)).await.unwrap();
        let outcome = store
            .upsert(
                1,
                ts(100),
                &PartialMetrics {
                    humidity: Some(60.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.updated_fields, vec![Metric::Humidity]);
        let row = store.latest(1).await.unwrap().unwrap();
        assert_eq!(row.temperature, Some(5.0));
        assert_eq!(row.humidity, Some(60.0));
    }

    #[tokio::test]
    async fn test_query_window_and_order() {
        // ---
        let store = MemoryStore::new();
        for secs in [300, 100, 200] {
            store.upsert(1, ts(secs), &temperature(secs as f64)).await.unwrap();
        }
        store.upsert(2, ts(150), &temperature(1.0)).await.unwrap();

        let window = TimeWindow::new(Some(ts(150)), None);
        let rows = store.query(1, Some(Metric::Humidity), window).await.unwrap();
        let stamps: Vec<i64> = rows.iter().map(|r| r.timestamp.timestamp()).collect();
        assert_eq!(stamps, vec![200, 300]);
        assert!(rows.iter().all(|r| r.temperature.is_none()));

        assert_eq!(store.count_in_window(&[1, 2], TimeWindow::default()).await.unwrap(), 4);
        assert_eq!(store.span(&[2]).await.unwrap(), Some((ts(150), ts(150))));
        assert_eq!(store.span(&[9]).await.unwrap(), None);

        let ranges = store.time_ranges().await.unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].start, ranges[0].end), (ts(100), ts(300)));
    }

    #[tokio::test]
    async fn test_cooldown_activate_and_clear() {
        // ---
        let store = MemoryStore::new();
        let hard = CooldownKey {
            device_id: 1,
            metric: Metric::Pollen,
            severity: Severity::Hard,
        };
        let soft = CooldownKey {
            severity: Severity::Soft,
            ..hard
        };

        assert_eq!(store.try_activate(&hard, ts(1)).await.unwrap(), Activation::Inserted);
        assert_eq!(
            store.try_activate(&hard, ts(2)).await.unwrap(),
            Activation::AlreadyActive
        );
        store.try_activate(&soft, ts(3)).await.unwrap();

        assert_eq!(store.clear(1, Metric::Pollen).await.unwrap(), 2);
        assert_eq!(store.clear(1, Metric::Pollen).await.unwrap(), 0);
        assert!(!store.is_active(&hard).await);
    }
}
