//! HTTP API integration tests.
//!
//! In-process tests that build the route table via `api_routes()` and
//! exercise the `/datasource`/`/phy` surface using `tower::ServiceExt::
//! oneshot()`. No subprocess spawn, no network port — sources stay in
//! `Init` state throughout, since opening one means launching a real
//! capture helper.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;

use captrace::api::{api_routes, ApiState};
use captrace::config::{self, DatasourceConfig};
use captrace::drivers::DriverRegistry;
use captrace::hop::HopScheduler;
use captrace::packetchain::{BoundedPacketChain, PacketChain};
use captrace::tracker::SourceTracker;

fn ensure_config() {
    let _ = config::init(DatasourceConfig::default());
}

fn test_state() -> ApiState {
    let drivers = Arc::new(DriverRegistry::with_builtin_drivers());
    let hop = Arc::new(HopScheduler::new());
    let (chain, _rx) = BoundedPacketChain::new();
    let chain: Arc<dyn PacketChain> = Arc::new(chain);
    let tracker = Arc::new(SourceTracker::new(drivers, hop, Arc::clone(&chain)));
    ApiState { tracker, chain }
}

async fn get(app: axum::Router, uri: &str) -> axum::http::Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post_json(app: axum::Router, uri: &str, body: serde_json::Value) -> axum::http::Response<Body> {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn all_sources_starts_empty() {
    ensure_config();
    let resp = get(api_routes(test_state()), "/datasource/all_sources").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let sources: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(sources.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn add_source_then_list_reflects_it() {
    ensure_config();
    let state = test_state();
    let app = api_routes(state);
    let resp = post_json(app.clone(), "/datasource/add_source", serde_json::json!({ "definition": "scan0" })).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let uuid = parsed["uuid"].as_str().unwrap();

    let resp = get(app.clone(), "/datasource/all_sources").await;
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let sources: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(sources.as_array().unwrap().len(), 1);

    let resp = get(app, &format!("/datasource/by-uuid/{uuid}/source.json")).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn add_source_rejects_unrecognized_definition() {
    ensure_config();
    let resp = post_json(
        api_routes(test_state()),
        "/datasource/add_source",
        serde_json::json!({ "definition": "foo0:type=nonexistent" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn probe_source_reports_success_for_virtual_scan() {
    ensure_config();
    let resp = post_json(
        api_routes(test_state()),
        "/datasource/probe_source",
        serde_json::json!({ "definition": "scan0" }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["success"], serde_json::json!(true));
}

#[tokio::test]
async fn list_interfaces_includes_virtual_scan() {
    ensure_config();
    let resp = get(api_routes(test_state()), "/datasource/list_interfaces").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let drivers: Vec<&str> = parsed.as_array().unwrap().iter().map(|e| e["driver"].as_str().unwrap()).collect();
    assert!(drivers.contains(&"virtualscan"));
}

#[tokio::test]
async fn unknown_source_uuid_returns_404() {
    ensure_config();
    let app = api_routes(test_state());
    let uuid = uuid::Uuid::new_v4();
    let resp = get(app.clone(), &format!("/datasource/by-uuid/{uuid}/source.json")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = get(app, &format!("/datasource/by-uuid/{uuid}/source.rrd")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn set_hop_then_close_round_trips_without_opening() {
    ensure_config();
    let state = test_state();
    let app = api_routes(state);
    let resp = post_json(app.clone(), "/datasource/add_source", serde_json::json!({ "definition": "scan0" })).await;
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let uuid = serde_json::from_slice::<serde_json::Value>(&body).unwrap()["uuid"].as_str().unwrap().to_string();

    let resp = post_json(
        app.clone(),
        &format!("/datasource/by-uuid/{uuid}/set_hop"),
        serde_json::json!({ "channels": ["1", "6", "11"], "rate_hz": 5.0 }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    // pause/resume don't require a live engine, only close does anything
    // state-machine relevant when the source was never opened.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/datasource/by-uuid/{uuid}/pause"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/datasource/by-uuid/{uuid}/close"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn scan_report_injects_packets_through_the_chain() {
    ensure_config();
    let state = test_state();
    let app = api_routes(state.clone());
    let resp = post_json(app.clone(), "/datasource/add_source", serde_json::json!({ "definition": "scan0" })).await;
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let uuid = serde_json::from_slice::<serde_json::Value>(&body).unwrap()["uuid"].as_str().unwrap().to_string();

    let resp = post_json(
        app,
        "/phy/phy80211/scan/scan_report",
        serde_json::json!({
            "source_uuid": uuid,
            "source_name": "scan0",
            "reports": [
                { "timestamp": 1, "lat": 1.0, "lon": 2.0, "alt": null, "signal": -55.0, "freqkhz": 2437000.0, "channel": 6, "tags": {} }
            ]
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn scan_report_creates_a_virtual_source_when_the_uuid_is_unknown() {
    ensure_config();
    let state = test_state();
    let app = api_routes(state.clone());
    assert_eq!(state.tracker.len(), 0);

    let resp = post_json(
        app,
        "/phy/phy80211/scan/scan_report",
        serde_json::json!({
            "source_uuid": "00000000-0000-0000-0000-000000000001",
            "source_name": "probe",
            "reports": [
                { "timestamp": 1700000000, "lat": 37.0, "lon": -122.0, "signal": -40.0, "channel": 6, "freqkhz": 2437000.0, "tags": {} }
            ]
        }),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "Scan report accepted");
    assert_eq!(json["success"], true);
    assert_eq!(state.tracker.len(), 1, "an unknown source_uuid should stand up a new virtual source");
}
