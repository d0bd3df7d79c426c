//! Integration tests for the query API endpoints.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeDelta, Utc};
use playtime_api::router::build_router;
use playtime_api::state::AppState;
use playtime_core::{EntityStore, ManualClock, PresenceTracker, SteamId};
use serde_json::Value;
use tower::ServiceExt;

const ALICE: &str = "76561198000000001";
const BOB: &str = "76561198000000002";

/// Alice played 120s, reconnected 30s ago as "Yrsa". Bob connected once
/// and left.
async fn make_test_state() -> Arc<AppState> {
    let clock = Arc::new(ManualClock::new(
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
    ));
    let tracker = PresenceTracker::new(clock.clone());
    let store = EntityStore::new().into_shared();
    let alice = SteamId::from(ALICE);
    let bob = SteamId::from(BOB);

    {
        let mut store = store.write().await;
        tracker.connect(&mut store, &bob, Some("Bjorn"));
        tracker.connect(&mut store, &alice, Some("Yrsa"));
        clock.advance(TimeDelta::seconds(120));
        tracker.disconnect(&mut store, &alice, None);
        tracker.disconnect(&mut store, &bob, None);
        clock.advance(TimeDelta::seconds(600));
        tracker.connect(&mut store, &alice, Some("Yrsa"));
        tracker.connect(&mut store, &alice, Some("Astrid"));
        clock.advance(TimeDelta::seconds(30));
    }

    Arc::new(AppState::new(store, clock))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(state: Arc<AppState>, path: &str) -> (StatusCode, Value) {
    let response = build_router(state)
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_to_json(response.into_body()).await)
}

fn seconds(value: &Value) -> f64 {
    value.as_f64().unwrap()
}

#[tokio::test]
async fn test_index_counts_online_and_lists_ids() {
    let (status, json) = get(make_test_state().await, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["playerCount"], 1);
    assert_eq!(json["steamIDs"], serde_json::json!([ALICE, BOB]));
}

#[tokio::test]
async fn test_index_on_empty_store() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let state = Arc::new(AppState::new(EntityStore::new().into_shared(), clock));
    let (status, json) = get(state, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["playerCount"], 0);
    assert_eq!(json["steamIDs"], serde_json::json!([]));
}

#[tokio::test]
async fn test_get_online_player() {
    let (status, json) = get(make_test_state().await, &format!("/{ALICE}")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["steamID"], ALICE);
    assert_eq!(json["online"], true);
    assert!((seconds(&json["ontime"]) - 30.0).abs() < 1e-6);
    assert!(seconds(&json["offtime"]).abs() < 1e-9);
    assert!((seconds(&json["totalPlaytime"]) - 120.0).abs() < 1e-6);
    assert!(json["onsince"].is_number());
    assert_eq!(json["profileCount"], 2);

    let profiles = json["profiles"].as_array().unwrap();
    assert_eq!(profiles.len(), 2);
    assert_eq!(profiles[0]["name"], "Yrsa");
    assert_eq!(profiles[0]["online"], false);
    assert!((seconds(&profiles[0]["totalPlaytime"]) - 120.0).abs() < 1e-6);
    assert_eq!(profiles[1]["name"], "Astrid");
    assert_eq!(profiles[1]["online"], true);
    assert!(profiles[1]["offsince"].is_null());
}

#[tokio::test]
async fn test_get_offline_player() {
    let (status, json) = get(make_test_state().await, &format!("/{BOB}")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["online"], false);
    assert!(seconds(&json["ontime"]).abs() < 1e-9);
    assert!((seconds(&json["offtime"]) - 630.0).abs() < 1e-6);
    assert!((seconds(&json["totalPlaytime"]) - 120.0).abs() < 1e-6);
    assert_eq!(json["profileCount"], 1);
}

#[tokio::test]
async fn test_get_player_not_found() {
    let (status, json) = get(make_test_state().await, "/76561198999999999").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json, serde_json::json!({ "error": "Player not found" }));
}

#[tokio::test]
async fn test_cors_header_present() {
    let response = build_router(make_test_state().await)
        .oneshot(
            Request::get("/")
                .header("origin", "http://dashboard.local")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));
}
