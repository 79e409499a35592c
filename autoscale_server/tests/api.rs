//! Endpoint tests over the assembled router.

use std::sync::Arc;

use autoscale_server::{router, AppState, MemoryStore, ServerConfig};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

const INGEST_SECRET: &str = "ingest-secret";
const PROC_SECRET: &str = "proc-secret";

fn app(default_household: Option<&str>) -> (Router, Arc<AppState>) {
    let config = ServerConfig {
        ingest_secret: Some(INGEST_SECRET.to_string()),
        processor_secret: Some(PROC_SECRET.to_string()),
        default_household_id: default_household.map(str::to_string),
        ..ServerConfig::default()
    };
    let state = Arc::new(AppState {
        store: Arc::new(MemoryStore::new()),
        config,
    });
    (router(state.clone()), state)
}

async fn post(
    app: &Router,
    uri: &str,
    secret: Option<&str>,
    body: Value,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("x-function-secret", secret);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// A clean 8 kg plateau, 10 Hz, with a short lead-in.
fn plateau_payload(scale_id: &str) -> Value {
    let mut samples = vec![json!({"t": 0, "kg": 0.0})];
    for i in 1..=80 {
        let phase = i as f64 * 2.0 * std::f64::consts::PI / 100.0;
        samples.push(json!({"t": i * 100, "kg": 8.0 + 0.004 * phase.sin()}));
    }
    json!({ "scale_id": scale_id, "t0_epoch_ms": 1_748_766_600_000i64, "samples": samples })
}

#[tokio::test]
async fn ingest_requires_the_secret() {
    let (app, _) = app(Some("hh-1"));
    let (status, body) = post(&app, "/ingest", None, plateau_payload("S1")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = post(&app, "/ingest", Some("wrong"), plateau_payload("S1")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ingest_accepts_and_derives_stats() {
    let (app, state) = app(Some("hh-1"));
    let (status, body) = post(&app, "/ingest", Some(INGEST_SECRET), plateau_payload("S1")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["ok"], true);
    assert_eq!(body["sample_count"], 81);
    let peak = body["peak_kg"].as_f64().unwrap();
    assert!((peak - 8.0).abs() < 0.01);

    // a pending job was enqueued alongside the event
    let claimed = state.store.claim_jobs(10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].attempts, 1);
}

#[tokio::test]
async fn malformed_payloads_get_precise_400s() {
    let (app, _) = app(Some("hh-1"));
    let cases = [
        (json!({"samples": [{"t": 0, "kg": 1.0}]}), "scale_id"),
        (json!({"scale_id": "S1", "samples": []}), "non-empty"),
        (json!({"scale_id": "S1"}), "samples"),
        (
            json!({"scale_id": "S1", "samples": [{"t": -1, "kg": 1.0}]}),
            "samples[0].t",
        ),
    ];
    for (payload, needle) in cases {
        let (status, body) = post(&app, "/ingest", Some(INGEST_SECRET), payload).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let msg = body["error"].as_str().unwrap();
        assert!(msg.contains(needle), "{msg:?} lacks {needle:?}");
    }
}

#[tokio::test]
async fn unknown_device_is_404_without_auto_registration() {
    let (app, _) = app(None);
    let (status, body) = post(&app, "/ingest", Some(INGEST_SECRET), plateau_payload("GHOST")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("GHOST"));
}

#[tokio::test]
async fn auto_registration_is_idempotent() {
    let (app, state) = app(Some("hh-1"));
    let (s1, _) = post(&app, "/ingest", Some(INGEST_SECRET), plateau_payload("S9")).await;
    let (s2, _) = post(&app, "/ingest", Some(INGEST_SECRET), plateau_payload("S9")).await;
    assert_eq!(s1, StatusCode::OK);
    assert_eq!(s2, StatusCode::OK);

    let device = state.store.find_device("S9").await.unwrap().unwrap();
    assert_eq!(device.household_id, "hh-1");
    assert_eq!(device.display_name, "S9");
}

#[tokio::test]
async fn missing_server_secret_is_a_500() {
    let config = ServerConfig::default(); // nothing set
    let state = Arc::new(AppState {
        store: Arc::new(MemoryStore::new()),
        config,
    });
    let app = router(state);
    let (status, body) = post(&app, "/ingest", Some("anything"), plateau_payload("S1")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("FUNCTION_SECRET"));
}

#[tokio::test]
async fn process_drains_the_queue_and_writes_a_result() {
    let (app, state) = app(Some("hh-1"));
    let (status, _) = post(&app, "/ingest", Some(INGEST_SECRET), plateau_payload("S1")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(&app, "/process?batch=5", Some(PROC_SECRET), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["ok"], true);
    assert_eq!(body["picked"], 1);

    // the job reached done and the result row exists
    let device = state.store.find_device("S1").await.unwrap().unwrap();
    let recent = state
        .store
        .recent_raw_weights(device.id, 10, uuid::Uuid::nil())
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert!((recent[0] - 8.0).abs() < 0.02);

    // nothing left to pick
    let (_, body) = post(&app, "/process?batch=5", Some(PROC_SECRET), json!({})).await;
    assert_eq!(body["picked"], 0);
}

#[tokio::test]
async fn process_requires_its_own_secret() {
    let (app, _) = app(Some("hh-1"));
    let (status, _) = post(&app, "/process?batch=1", Some(INGEST_SECRET), json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn device_registration_returns_the_canonical_row() {
    let (app, _) = app(Some("hh-1"));
    let payload = json!({"device_id": "SCALE-7", "display_name": "Kitchen"});
    let (status, body) = post(&app, "/devices", Some(PROC_SECRET), payload.clone()).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["ok"], true);
    assert_eq!(body["scale"]["device_id"], "SCALE-7");
    assert_eq!(body["scale"]["display_name"], "Kitchen");
    assert_eq!(body["scale"]["household_id"], "hh-1");
    let first_id = body["scale"]["id"].as_str().unwrap().to_string();

    // registering again lands on the same row
    let (_, body) = post(&app, "/devices", Some(PROC_SECRET), payload).await;
    assert_eq!(body["scale"]["id"].as_str().unwrap(), first_id);
}

#[tokio::test]
async fn registration_without_any_household_is_a_400() {
    let (app, _) = app(None);
    let (status, _) = post(&app, "/devices", Some(PROC_SECRET), json!({"device_id": "X"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn event_summary_classifies_the_morning() {
    let (app, state) = app(Some("hh-1"));
    post(&app, "/ingest", Some(INGEST_SECRET), plateau_payload("S1")).await;
    let jobs = state.store.claim_jobs(1).await.unwrap();
    let event_id = jobs[0].event_id;

    let request = Request::builder()
        .method("GET")
        .uri(format!("/events/{event_id}/summary"))
        .header("x-function-secret", PROC_SECRET)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["sample_count"], 81);
    // anchor 2025-06-01T08:30:00Z -> hour 8 -> Morning
    assert_eq!(body["phase"], "Morning");
}
