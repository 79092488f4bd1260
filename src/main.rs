//! Application entry point for the `sensorwatch` service.
//!
//! Startup sequence:
//! - Load configuration from environment variables or `.env`
//! - Initialize structured logging
//! - Open the PostgreSQL pool and create the schema if needed
//! - Spawn the MQTT ingestion consumer under a restart loop
//! - Serve the HTTP API from the `routes` gateway
//!
//! # Environment Variables
//! See [`sensorwatch::config::load_from_env`] for the full list. Logging is
//! controlled here by `LOG_LEVEL`, `LOG_FORMAT`, `LOG_SPAN_EVENTS` and
//! `FORCE_COLOR`.
use std::{env, net::SocketAddr, str::FromStr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use sensorwatch::alert::AlertEvaluator;
use sensorwatch::ingest::{mqtt, Ingestor};
use sensorwatch::notify::{LogNotifier, Notifier, SmtpNotifier};
use sensorwatch::routes::{self, AppState};
use sensorwatch::store::PgStore;
use sensorwatch::{config, schema, Config};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let connect_options = PgConnectOptions::from_str(&cfg.db_url)
        .context("Invalid DATABASE_URL")?
        .options([(
            "statement_timeout",
            cfg.db_statement_timeout_ms.to_string(),
        )]);

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .acquire_timeout(Duration::from_secs(cfg.db_acquire_timeout_secs))
        .connect_with(connect_options)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let store = Arc::new(PgStore::new(pool));
    let notifier = build_notifier(&cfg)?;
    let evaluator = Arc::new(AlertEvaluator::new(store.clone(), notifier));

    spawn_ingestion(&cfg, Ingestor::new(store.clone()));

    let state = AppState {
        series: store.clone(),
        settings: store,
        evaluator,
    };
    let app = routes::router(state, &cfg.cors_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

fn build_notifier(cfg: &Config) -> Result<Arc<dyn Notifier>> {
    // ---
    match &cfg.smtp {
        Some(smtp) => {
            let notifier = SmtpNotifier::new(smtp)
                .with_context(|| format!("Invalid SMTP relay '{}'", smtp.host))?;
            Ok(Arc::new(notifier))
        }
        None => {
            tracing::warn!("SMTP_HOST not set, alerts will only be logged");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Run the MQTT consumer forever, restarting it after a fixed delay
/// whenever it returns.
fn spawn_ingestion(cfg: &Config, ingestor: Ingestor) {
    // ---
    let Some(mqtt_cfg) = cfg.mqtt.clone() else {
        tracing::warn!("MQTT_BROKER not set, ingestion disabled");
        return;
    };
    let delay = Duration::from_secs(cfg.ingest_restart_delay_secs);

    tokio::spawn(async move {
        loop {
            match mqtt::run(&mqtt_cfg, &ingestor).await {
                Ok(()) => tracing::warn!("Ingestion consumer stopped"),
                Err(e) => tracing::error!(error = %format!("{e:#}"), "Ingestion consumer failed"),
            }
            tracing::info!(delay_secs = delay.as_secs(), "Restarting ingestion consumer");
            tokio::time::sleep(delay).await;
        }
    });
}

/// Initialize the global tracing subscriber.
///
/// - `LOG_LEVEL`: trace, debug, info (default), warn or error. `RUST_LOG`
///   takes precedence when set.
/// - `LOG_FORMAT`: `json` for one JSON object per line; anything else gives
///   the compact human-readable format.
/// - `LOG_SPAN_EVENTS`: `full`, `enter_exit`, or unset for CLOSE only.
/// - `FORCE_COLOR`: `1|true|yes` or `0|false|no`; otherwise TTY detection.
///   Only applies to the compact format.
fn init_tracing() {
    // ---
    let span_events = match env::var("LOG_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,rumqttc=warn"))
    };

    let builder = tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter);

    if json_logs(env::var("LOG_FORMAT").ok().as_deref()) {
        builder.with_ansi(false).json().init();
    } else {
        builder.with_ansi(use_color).compact().init();
    }
}

fn json_logs(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_compact_logs_unless_json_requested() {
        // ---
        assert!(!json_logs(None));
        assert!(!json_logs(Some("pretty")));
        assert!(json_logs(Some("json")));
        assert!(json_logs(Some("JSON")));
    }
}
