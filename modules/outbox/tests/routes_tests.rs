mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use common::{body_json, correlated_event, event_with_budget, order_event};
use outbox_rs::{FailureKind, InMemoryOutboxStore, OutboxStore};
use tower::ServiceExt;

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// TEST 1: Health endpoint
#[tokio::test]
async fn test_health() {
    let store = InMemoryOutboxStore::new();
    let response = common::app(&store).oneshot(get("/api/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "outbox-rs");
}

/// TEST 2: Stats report counts per status
#[tokio::test]
async fn test_stats_counts_per_status() {
    let store = InMemoryOutboxStore::new();
    let now = Utc::now();
    let a = store.insert(&order_event("a")).await.unwrap();
    store.insert(&order_event("b")).await.unwrap();
    let c = store.insert(&event_with_budget("c", 1)).await.unwrap();
    store.mark_published(&a, now).await.unwrap();
    store
        .mark_failed(&c, "x", FailureKind::Transient, now)
        .await
        .unwrap();

    let response = common::app(&store).oneshot(get("/api/outbox/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["pending"], 1);
    assert_eq!(json["published"], 1);
    assert_eq!(json["retry"], 0);
    assert_eq!(json["dead_letter"], 1);
    assert_eq!(json["total"], 3);
}

/// TEST 3: Lookup by correlation id
#[tokio::test]
async fn test_events_by_correlation_id() {
    let store = InMemoryOutboxStore::new();
    store.insert(&correlated_event("a", "req-1")).await.unwrap();
    store.insert(&correlated_event("b", "req-2")).await.unwrap();

    let response = common::app(&store)
        .oneshot(get("/api/outbox/events?correlation_id=req-1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let events = json.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_id"], "a");
    assert_eq!(events[0]["status"], "PENDING");
    assert_eq!(events[0]["event_type"], "ORDER_CREATED");
}

/// TEST 4: Missing correlation id is a bad request
#[tokio::test]
async fn test_events_without_correlation_id() {
    let store = InMemoryOutboxStore::new();
    let response = common::app(&store).oneshot(get("/api/outbox/events")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "bad_request");
}

/// TEST 5: Lookup by id, 404 when absent
#[tokio::test]
async fn test_event_by_id() {
    let store = InMemoryOutboxStore::new();
    let record = store.insert(&order_event("e1")).await.unwrap();

    let found = common::app(&store)
        .oneshot(get(&format!("/api/outbox/events/{}", record.id)))
        .await
        .unwrap();
    assert_eq!(found.status(), StatusCode::OK);
    let json = body_json(found).await;
    assert_eq!(json["event_id"], "e1");
    assert_eq!(json["version"], 0);

    let missing = common::app(&store)
        .oneshot(get("/api/outbox/events/4242"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(missing).await["error"], "not_found");
}

/// TEST 6: Redrive a dead-lettered record; 409 for anything else
#[tokio::test]
async fn test_redrive() {
    let store = InMemoryOutboxStore::new();
    let record = store.insert(&event_with_budget("e1", 1)).await.unwrap();
    let uri = format!("/api/outbox/events/{}/redrive", record.id);

    let not_dead = common::app(&store).oneshot(post(&uri)).await.unwrap();
    assert_eq!(not_dead.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(not_dead).await["error"], "invalid_transition");

    store
        .mark_failed(&record, "broker gone", FailureKind::Transient, Utc::now())
        .await
        .unwrap();

    let redriven = common::app(&store).oneshot(post(&uri)).await.unwrap();
    assert_eq!(redriven.status(), StatusCode::OK);
    let json = body_json(redriven).await;
    assert_eq!(json["status"], "PENDING");
    assert_eq!(json["retry_count"], 0);

    let missing = common::app(&store)
        .oneshot(post("/api/outbox/events/999/redrive"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

/// TEST 7: Metrics endpoint exposes the status gauge
#[tokio::test]
async fn test_metrics_endpoint() {
    let store = InMemoryOutboxStore::new();
    store.insert(&order_event("e1")).await.unwrap();

    let response = common::app(&store).oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains("outbox_records"));
    assert!(body.contains("PENDING"));
}
