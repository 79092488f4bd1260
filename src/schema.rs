//! Database schema management for `sensorwatch`.
//!
//! Ensures required tables exist before serving requests or ingesting.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `sensor_data` time series, the `alert_cooldowns` suppression
/// table, and the two settings tables. Safe to call on every startup; no-op if
/// objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // One row per device and second; metrics are filled in by separate messages
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_data (
            device_id          INTEGER          NOT NULL,
            timestamp          TIMESTAMPTZ      NOT NULL,
            temperature        DOUBLE PRECISION,
            humidity           DOUBLE PRECISION,
            pollen             INTEGER,
            particulate_matter INTEGER,
            PRIMARY KEY (device_id, timestamp)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Existence of a row means that severity is currently suppressed
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert_cooldowns (
            device_id  INTEGER     NOT NULL,
            metric     TEXT        NOT NULL,
            severity   TEXT        NOT NULL CHECK (severity IN ('soft', 'hard')),
            last_sent  TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (device_id, metric, severity)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS thresholds (
            metric      TEXT PRIMARY KEY,
            red_low     DOUBLE PRECISION NOT NULL,
            yellow_low  DOUBLE PRECISION NOT NULL,
            yellow_high DOUBLE PRECISION NOT NULL,
            red_high    DOUBLE PRECISION NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alert_recipients (
            email TEXT PRIMARY KEY
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Range scans across devices for comparisons
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_data_timestamp
            ON sensor_data (timestamp);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
