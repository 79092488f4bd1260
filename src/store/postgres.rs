//! PostgreSQL implementation of the store traits.
//!
//! All SQL here is static. Metric selection never reaches the query text:
//! rows always carry all four metric columns and narrowing happens on the
//! decoded [`Reading`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};

use super::{Activation, CooldownStore, SeriesStore, SettingsStore, TimeWindow};
use crate::error::StorageError;
use crate::models::{
    CooldownKey, DeviceId, DeviceTimeRange, Metric, PartialMetrics, Reading, ThresholdProfile,
    UpsertOutcome,
};

// ---

const UPSERT_READING: &str = r#"
    INSERT INTO sensor_data (device_id, timestamp, temperature, humidity, pollen, particulate_matter)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (device_id, timestamp) DO UPDATE SET
        temperature        = COALESCE(EXCLUDED.temperature, sensor_data.temperature),
        humidity           = COALESCE(EXCLUDED.humidity, sensor_data.humidity),
        pollen             = COALESCE(EXCLUDED.pollen, sensor_data.pollen),
        particulate_matter = COALESCE(EXCLUDED.particulate_matter, sensor_data.particulate_matter)
"#;

const SELECT_DEVICE_READINGS: &str = r#"
    SELECT device_id, timestamp, temperature, humidity, pollen, particulate_matter
    FROM sensor_data
    WHERE device_id = $1
      AND ($2::timestamptz IS NULL OR timestamp >= $2)
      AND ($3::timestamptz IS NULL OR timestamp <= $3)
    ORDER BY timestamp ASC
"#;

const SELECT_LATEST: &str = r#"
    SELECT device_id, timestamp, temperature, humidity, pollen, particulate_matter
    FROM sensor_data
    WHERE device_id = $1
    ORDER BY timestamp DESC
    LIMIT 1
"#;

const SELECT_TIME_RANGES: &str = r#"
    SELECT device_id, MIN(timestamp) AS start, MAX(timestamp) AS "end"
    FROM sensor_data
    GROUP BY device_id
    ORDER BY device_id
"#;

const COUNT_IN_WINDOW: &str = r#"
    SELECT COUNT(*)
    FROM sensor_data
    WHERE device_id = ANY($1)
      AND ($2::timestamptz IS NULL OR timestamp >= $2)
      AND ($3::timestamptz IS NULL OR timestamp <= $3)
"#;

const SELECT_WINDOW_READINGS: &str = r#"
    SELECT device_id, timestamp, temperature, humidity, pollen, particulate_matter
    FROM sensor_data
    WHERE device_id = ANY($1)
      AND ($2::timestamptz IS NULL OR timestamp >= $2)
      AND ($3::timestamptz IS NULL OR timestamp <= $3)
    ORDER BY device_id, timestamp ASC
"#;

/// Store backed by a shared connection pool.
///
/// Each call checks out its own connection, so concurrent ingestion
/// consumers and API queries never share a session.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

fn classify(op: &'static str) -> impl FnOnce(sqlx::Error) -> StorageError {
    move |e| StorageError::classify(op, e)
}

#[async_trait]
impl SeriesStore for PgStore {
    // ---
    async fn upsert(
        &self,
        device_id: DeviceId,
        timestamp: DateTime<Utc>,
        metrics: &PartialMetrics,
    ) -> Result<UpsertOutcome, StorageError> {
        // ---
        let mut tx = self.pool.begin().await.map_err(classify("upsert.begin"))?;

        let result = sqlx::query(UPSERT_READING)
            .bind(device_id)
            .bind(timestamp)
            .bind(metrics.temperature)
            .bind(metrics.humidity)
            .bind(metrics.pollen)
            .bind(metrics.particulate_matter)
            .execute(&mut *tx)
            .await;

        let done = match result {
            Ok(done) => done,
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(device_id, error = %rb, "Rollback after failed upsert also failed");
                }
                return Err(StorageError::classify("upsert", e));
            }
        };
        tx.commit().await.map_err(classify("upsert.commit"))?;

        debug!(device_id, %timestamp, rows = done.rows_affected(), "Reading upserted");
        Ok(UpsertOutcome {
            updated_fields: metrics.present(),
            rows_affected: done.rows_affected(),
        })
    }

    async fn query(
        &self,
        device_id: DeviceId,
        metric: Option<Metric>,
        window: TimeWindow,
    ) -> Result<Vec<Reading>, StorageError> {
        // ---
        let rows: Vec<Reading> = sqlx::query_as(SELECT_DEVICE_READINGS)
            .bind(device_id)
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await
            .map_err(classify("query"))?;

        Ok(match metric {
            Some(m) => rows.iter().map(|r| r.only(m)).collect(),
            None => rows,
        })
    }

    async fn latest(&self, device_id: DeviceId) -> Result<Option<Reading>, StorageError> {
        sqlx::query_as(SELECT_LATEST)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify("latest"))
    }

    async fn device_exists(&self, device_id: DeviceId) -> Result<bool, StorageError> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sensor_data WHERE device_id = $1)")
            .bind(device_id)
            .fetch_one(&self.pool)
            .await
            .map_err(classify("device_exists"))
    }

    async fn time_ranges(&self) -> Result<Vec<DeviceTimeRange>, StorageError> {
        sqlx::query_as(SELECT_TIME_RANGES)
            .fetch_all(&self.pool)
            .await
            .map_err(classify("time_ranges"))
    }

    async fn count_in_window(
        &self,
        devices: &[DeviceId],
        window: TimeWindow,
    ) -> Result<i64, StorageError> {
        sqlx::query_scalar(COUNT_IN_WINDOW)
            .bind(devices.to_vec())
            .bind(window.start)
            .bind(window.end)
            .fetch_one(&self.pool)
            .await
            .map_err(classify("count_in_window"))
    }

    async fn span(
        &self,
        devices: &[DeviceId],
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, StorageError> {
        // ---
        let (min, max): (Option<DateTime<Utc>>, Option<DateTime<Utc>>) = sqlx::query_as(
            "SELECT MIN(timestamp), MAX(timestamp) FROM sensor_data WHERE device_id = ANY($1)",
        )
        .bind(devices.to_vec())
        .fetch_one(&self.pool)
        .await
        .map_err(classify("span"))?;

        Ok(min.zip(max))
    }

    async fn readings_in_window(
        &self,
        devices: &[DeviceId],
        window: TimeWindow,
    ) -> Result<Vec<Reading>, StorageError> {
        sqlx::query_as(SELECT_WINDOW_READINGS)
            .bind(devices.to_vec())
            .bind(window.start)
            .bind(window.end)
            .fetch_all(&self.pool)
            .await
            .map_err(classify("readings_in_window"))
    }
}

#[async_trait]
impl CooldownStore for PgStore {
    // ---
    async fn try_activate(
        &self,
        key: &CooldownKey,
        at: DateTime<Utc>,
    ) -> Result<Activation, StorageError> {
        // ---
        let done = sqlx::query(
            r#"
            INSERT INTO alert_cooldowns (device_id, metric, severity, last_sent)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (device_id, metric, severity) DO NOTHING
            "#,
        )
        .bind(key.device_id)
        .bind(key.metric.as_str())
        .bind(key.severity.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(classify("cooldown.activate"))?;

        Ok(if done.rows_affected() == 1 {
            Activation::Inserted
        } else {
            Activation::AlreadyActive
        })
    }

    async fn release(&self, key: &CooldownKey) -> Result<bool, StorageError> {
        let done = sqlx::query(
            "DELETE FROM alert_cooldowns WHERE device_id = $1 AND metric = $2 AND severity = $3",
        )
        .bind(key.device_id)
        .bind(key.metric.as_str())
        .bind(key.severity.as_str())
        .execute(&self.pool)
        .await
        .map_err(classify("cooldown.release"))?;

        Ok(done.rows_affected() > 0)
    }

    async fn clear(&self, device_id: DeviceId, metric: Metric) -> Result<u64, StorageError> {
        let done = sqlx::query("DELETE FROM alert_cooldowns WHERE device_id = $1 AND metric = $2")
            .bind(device_id)
            .bind(metric.as_str())
            .execute(&self.pool)
            .await
            .map_err(classify("cooldown.clear"))?;

        Ok(done.rows_affected())
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    // ---
    async fn thresholds(&self) -> Result<BTreeMap<Metric, ThresholdProfile>, StorageError> {
        // ---
        let rows: Vec<(String, f64, f64, f64, f64)> = sqlx::query_as(
            "SELECT metric, red_low, yellow_low, yellow_high, red_high FROM thresholds",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify("thresholds"))?;

        let mut profiles = BTreeMap::new();
        for (name, red_low, yellow_low, yellow_high, red_high) in rows {
            match name.parse::<Metric>() {
                Ok(metric) => {
                    profiles.insert(
                        metric,
                        ThresholdProfile {
                            red_low,
                            yellow_low,
                            yellow_high,
                            red_high,
                        },
                    );
                }
                Err(_) => warn!(metric = %name, "Ignoring threshold row for unknown metric"),
            }
        }
        Ok(profiles)
    }

    async fn save_thresholds(
        &self,
        profiles: &BTreeMap<Metric, ThresholdProfile>,
    ) -> Result<(), StorageError> {
        // ---
        let mut tx = self.pool.begin().await.map_err(classify("thresholds.begin"))?;

        for (metric, p) in profiles {
            sqlx::query(
                r#"
                INSERT INTO thresholds (metric, red_low, yellow_low, yellow_high, red_high)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (metric) DO UPDATE SET
                    red_low     = EXCLUDED.red_low,
                    yellow_low  = EXCLUDED.yellow_low,
                    yellow_high = EXCLUDED.yellow_high,
                    red_high    = EXCLUDED.red_high
                "#,
            )
            .bind(metric.as_str())
            .bind(p.red_low)
            .bind(p.yellow_low)
            .bind(p.yellow_high)
            .bind(p.red_high)
            .execute(&mut *tx)
            .await
            .map_err(classify("thresholds.save"))?;
        }

        tx.commit().await.map_err(classify("thresholds.commit"))
    }

    async fn alert_recipient(&self) -> Result<Option<String>, StorageError> {
        sqlx::query_scalar("SELECT email FROM alert_recipients LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(classify("alert_recipient"))
    }

    async fn set_alert_recipient(&self, email: &str) -> Result<(), StorageError> {
        // ---
        let mut tx = self.pool.begin().await.map_err(classify("alert_recipient.begin"))?;

        sqlx::query("DELETE FROM alert_recipients")
            .execute(&mut *tx)
            .await
            .map_err(classify("alert_recipient.delete"))?;
        sqlx::query("INSERT INTO alert_recipients (email) VALUES ($1)")
            .bind(email)
            .execute(&mut *tx)
            .await
            .map_err(classify("alert_recipient.insert"))?;

        tx.commit().await.map_err(classify("alert_recipient.commit"))
    }
}
