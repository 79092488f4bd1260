//! End-to-end tests of the HTTP API.
//!
//! The in-process tests drive the real router over a `MemoryStore`, seeded
//! through the same `Ingestor` the MQTT consumer uses. The final test runs
//! against a live deployment and is skipped unless `BASE_URL` is set.

use std::sync::Arc;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use reqwest::Client;
use serde_json::{json, Value};
use tower::ServiceExt;

use sensorwatch::alert::AlertEvaluator;
use sensorwatch::ingest::{Disposition, Ingestor};
use sensorwatch::notify::LogNotifier;
use sensorwatch::routes::{self, AppState};
use sensorwatch::store::MemoryStore;

const T0: i64 = 1_700_000_000;
const TEMPERATURE_TOPIC: &str = "dhbw/ai/si2023/01/temperature/01";
const HUMIDITY_TOPIC: &str = "dhbw/ai/si2023/01/humidity/01";

// ---

fn app(store: Arc<MemoryStore>) -> Router {
    // ---
    let evaluator = Arc::new(AlertEvaluator::new(store.clone(), Arc::new(LogNotifier)));
    let state = AppState {
        series: store.clone(),
        settings: store,
        evaluator,
    };
    routes::router(state, &["http://localhost:3000".to_string()])
}

async fn ingest(store: &Arc<MemoryStore>, topic: &str, device: i32, ts: i64, value: f64) {
    // ---
    let payload = json!({ "value": value, "timestamp": ts, "meta": { "device_id": device } });
    let ingestor = Ingestor::new(store.clone());
    let outcome = ingestor
        .handle(topic, &serde_json::to_vec(&payload).unwrap())
        .await
        .unwrap();
    assert!(matches!(outcome, Disposition::Stored(_)), "{outcome:?}");
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// ---

#[tokio::test]
async fn health_reports_ok() {
    // ---
    let app = app(Arc::new(MemoryStore::new()));
    let (status, body) = get(&app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].as_i64().unwrap() > T0);
}

#[tokio::test]
async fn device_data_merges_metrics_and_validates_input() {
    // ---
    let store = Arc::new(MemoryStore::new());
    ingest(&store, TEMPERATURE_TOPIC, 1, T0, 21.5).await;
    ingest(&store, HUMIDITY_TOPIC, 1, T0, 40.0).await;
    ingest(&store, TEMPERATURE_TOPIC, 1, T0 + 60, 22.0).await;
    let app = app(store);

    let (status, body) = get(&app, "/api/devices/1/data").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["unix_timestamp_seconds"], T0);
    assert_eq!(rows[0]["temperature"], 21.5);
    assert_eq!(rows[0]["humidity"], 40.0);

    // Metric filter drops the other columns
    let uri = format!("/api/devices/1/data?metric=temperature&start={}", T0 + 1);
    let (status, body) = get(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["temperature"], 22.0);
    assert!(rows[0].get("humidity").is_none());

    let (status, _) = get(&app, "/api/devices/0/data").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(&app, "/api/devices/1/data?metric=co2").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, _) = get(&app, "/api/devices/9/data").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn latest_and_range_report_newest_rows() {
    // ---
    let store = Arc::new(MemoryStore::new());
    ingest(&store, TEMPERATURE_TOPIC, 1, T0, 20.0).await;
    ingest(&store, TEMPERATURE_TOPIC, 1, T0 + 300, 25.0).await;
    ingest(&store, TEMPERATURE_TOPIC, 2, T0 + 100, 18.0).await;
    let app = app(store);

    let (status, body) = get(&app, "/api/devices/1/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["unix_timestamp_seconds"], T0 + 300);
    assert_eq!(body["data"]["temperature"], 25.0);

    let (status, _) = get(&app, "/api/devices/3/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get(&app, "/api/range").await;
    assert_eq!(status, StatusCode::OK);
    let ranges = body["data"].as_array().unwrap();
    assert_eq!(ranges.len(), 2);
    assert_eq!(ranges[0]["device_id"], 1);
    assert_eq!(ranges[0]["start"], T0);
    assert_eq!(ranges[0]["end"], T0 + 300);
}

#[tokio::test]
async fn comparison_buckets_or_falls_back_to_raw() {
    // ---
    let store = Arc::new(MemoryStore::new());
    for i in 0..10 {
        ingest(&store, TEMPERATURE_TOPIC, 1, T0 + 10 * i, (10 + i) as f64).await;
    }
    let app = app(store);

    let uri = format!(
        "/api/comparison?device_1=1&metric=temperature&start={T0}&end={}&buckets=5",
        T0 + 100
    );
    let (status, body) = get(&app, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bucket_size"], 20);
    let buckets = body["device_1"].as_array().unwrap();
    assert_eq!(buckets.len(), 5);
    assert_eq!(buckets[0]["timestamp"], T0);
    assert_eq!(buckets[0]["value"], 10.5);
    assert_eq!(buckets[0]["count"], 2);
    assert_eq!(body["device_2"], json!([]));

    // More buckets than rows: raw series plus a warning
    let uri = "/api/comparison?device_1=1&metric=temperature&buckets=50";
    let (status, body) = get(&app, uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device_1"].as_array().unwrap().len(), 10);
    assert!(body["bucket_size"].is_null());
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("(50)") && message.contains("(10)"), "{message}");

    // Only device_2 given: its series stays under the device_2 key
    let (status, body) = get(&app, "/api/comparison?device_2=1&metric=temperature").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device_1"], json!([]));
    assert_eq!(body["device_2"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn comparison_rejects_bad_requests() {
    // ---
    let app = app(Arc::new(MemoryStore::new()));

    for uri in [
        "/api/comparison?device_1=1",
        "/api/comparison?metric=temperature",
        "/api/comparison?device_1=-4&metric=temperature",
        "/api/comparison?device_1=1&metric=co2",
        "/api/comparison?device_1=1&metric=temperature&start=200&end=100",
        "/api/comparison?device_1=1&metric=temperature&buckets=0",
    ] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["status"], "error", "{uri}");
    }
}

#[tokio::test]
async fn thresholds_are_validated_and_stored() {
    // ---
    let app = app(Arc::new(MemoryStore::new()));

    let bad = json!({
        "temperature": { "redLow": 5.0, "yellowLow": 3.0, "yellowHigh": 25.0, "redHigh": 30.0 }
    });
    let (status, body) = post(&app, "/api/thresholds", bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("redLow"));

    let (status, _) = post(&app, "/api/thresholds", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let good = json!({
        "temperature": { "redLow": 5.0, "yellowLow": 10.0, "yellowHigh": 25.0, "redHigh": 30.0 }
    });
    let (status, _) = post(&app, "/api/thresholds", good.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(&app, "/api/thresholds").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"], good);
}

#[tokio::test]
async fn alert_mail_fires_once_per_breach() {
    // ---
    let app = app(Arc::new(MemoryStore::new()));
    let profile = json!({ "redLow": 5.0, "yellowLow": 10.0, "yellowHigh": 25.0, "redHigh": 30.0 });

    // Nobody to notify yet
    let alert = |value: f64| json!({ "device": 4, "metric": "temperature", "value": value, "thresholds": profile });
    let (status, _) = post(&app, "/api/send_alert_mail", alert(35.0)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = post(&app, "/api/alert_email", json!({ "email": "not an address" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&app, "/api/alert_email", json!({ "email": "ops@example.com" })).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = get(&app, "/api/alert_email").await;
    assert_eq!(body["email"], "ops@example.com");

    // The failed attempt above must not have left a suppression behind
    let (status, body) = post(&app, "/api/send_alert_mail", alert(35.0)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "hard alert sent");

    let (_, body) = post(&app, "/api/send_alert_mail", alert(36.0)).await;
    assert_eq!(body["message"], "hard alert already active");

    let (_, body) = post(&app, "/api/send_alert_mail", alert(28.0)).await;
    assert_eq!(body["message"], "soft alert sent");

    let (_, body) = post(&app, "/api/send_alert_mail", alert(20.0)).await;
    assert_eq!(body["message"], "no threshold exceeded");

    let (_, body) = post(&app, "/api/send_alert_mail", alert(35.0)).await;
    assert_eq!(body["message"], "hard alert sent");
}

#[tokio::test]
async fn alert_mail_picks_profile_from_metric_keyed_thresholds() {
    // ---
    let app = app(Arc::new(MemoryStore::new()));
    post(&app, "/api/alert_email", json!({ "email": "ops@example.com" })).await;

    let thresholds = json!({
        "temperature": { "redLow": 5.0, "yellowLow": 10.0, "yellowHigh": 25.0, "redHigh": 30.0 },
        "humidity": { "redLow": 10.0, "yellowLow": 20.0, "yellowHigh": 60.0, "redHigh": 80.0 }
    });

    // 70 % is only a soft breach under the humidity profile
    let body = json!({ "device": 2, "metric": "humidity", "value": 70.0, "thresholds": thresholds });
    let (status, body) = post(&app, "/api/send_alert_mail", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "soft alert sent");

    // Requested metric missing from the map and nothing stored
    let partial = json!({ "temperature": thresholds["temperature"] });
    let body = json!({ "device": 2, "metric": "pollen", "value": 10.0, "thresholds": partial });
    let (status, _) = post(&app, "/api/send_alert_mail", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn alert_mail_needs_thresholds() {
    // ---
    let app = app(Arc::new(MemoryStore::new()));

    let body = json!({ "device": 4, "metric": "humidity", "value": 99.0 });
    let (status, _) = post(&app, "/api/send_alert_mail", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---

#[tokio::test]
async fn live_deployment_smoke() -> Result<()> {
    // ---
    let Ok(base) = std::env::var("BASE_URL") else {
        eprintln!("BASE_URL not set, skipping live smoke test");
        return Ok(());
    };
    let client = Client::new();

    let health: Value = client.get(format!("{base}/health")).send().await?.json().await?;
    assert_eq!(health["status"], "ok");

    let range: Value = client.get(format!("{base}/api/range")).send().await?.json().await?;
    assert_eq!(range["status"], "success");
    assert!(range["data"].is_array());

    Ok(())
}
