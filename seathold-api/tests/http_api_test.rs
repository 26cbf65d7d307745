use axum::body::{to_bytes, Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use futures_util::StreamExt;
use seathold_api::{app, AppState};
use seathold_core::ManualClock;
use seathold_shared::{Event, HoldNotification};
use seathold_store::Config;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    state: AppState,
    clock: Arc<ManualClock>,
    event_id: Uuid,
}

fn test_app(seats: &[&str]) -> TestApp {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let state = AppState::from_config(&Config::default(), clock.clone()).unwrap();
    let event = Event::new("Matinee", seats.iter().map(|s| s.to_string()).collect());
    let event_id = event.id;
    state.ledger().register_event(event).unwrap();

    TestApp { router: app(state.clone()), state, clock, event_id }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body)
}

fn json_of(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

fn hold_request(key: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/holds")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("idempotency-key", key);
    }
    builder.body(Body::from(body)).unwrap()
}

fn hold_body(event_id: Uuid, seats: &[&str], user_id: Uuid) -> String {
    json!({ "event_id": event_id, "seats": seats, "user_id": user_id }).to_string()
}

fn empty(method: &str, uri: String) -> Request<Body> {
    Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_conflict_then_identical_replay() {
    let t = test_app(&["A1", "A2"]);
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let (status, first) = send(&t.router, hold_request(Some("r1"), hold_body(t.event_id, &["A1"], alice))).await;
    assert_eq!(status, StatusCode::CREATED);
    let receipt = json_of(&first);
    assert_eq!(receipt["seats"], json!(["A1"]));
    assert_eq!(receipt["user_id"], json!(alice));
    assert!(receipt.get("status").is_none());

    let (status, conflict) = send(&t.router, hold_request(Some("r2"), hold_body(t.event_id, &["A1"], bob))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let conflict = json_of(&conflict);
    assert_eq!(conflict["kind"], "seat_unavailable");
    assert_eq!(conflict["seats"], json!(["A1"]));

    let (status, replay) = send(&t.router, hold_request(Some("r1"), hold_body(t.event_id, &["A1"], alice))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(replay, first);

    assert_eq!(t.state.metrics.holds_created.get(), 1);
    assert_eq!(t.state.metrics.idempotent_replays.get(), 1);
}

#[tokio::test]
async fn test_cached_conflict_survives_release() {
    let t = test_app(&["A1"]);
    let (_, first) = send(&t.router, hold_request(Some("winner"), hold_body(t.event_id, &["A1"], Uuid::new_v4()))).await;
    let hold_id = json_of(&first)["hold_id"].as_str().unwrap().to_string();

    let loser = hold_body(t.event_id, &["A1"], Uuid::new_v4());
    let (status, rejected) = send(&t.router, hold_request(Some("loser"), loser.clone())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&t.router, empty("DELETE", format!("/v1/holds/{}", hold_id))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, replay) = send(&t.router, hold_request(Some("loser"), loser)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(replay, rejected);
}

#[tokio::test]
async fn test_unknown_seat_touches_nothing() {
    let t = test_app(&["A1", "A2"]);

    let (status, body) = send(&t.router, hold_request(Some("k"), hold_body(t.event_id, &["A1", "A9"], Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = json_of(&body);
    assert_eq!(body["kind"], "unknown_seat");
    assert_eq!(body["seats"], json!(["A9"]));

    let (status, seats) = send(&t.router, empty("GET", format!("/v1/events/{}/seats", t.event_id))).await;
    assert_eq!(status, StatusCode::OK);
    let seats = json_of(&seats);
    assert_eq!(seats["availability"]["free"], 2);
    assert_eq!(seats["seats"][0]["label"], "A1");
    assert_eq!(seats["seats"][0]["state"], "FREE");
}

#[tokio::test]
async fn test_key_reuse_with_different_body() {
    let t = test_app(&["A1", "A2"]);
    let user = Uuid::new_v4();

    let (status, _) = send(&t.router, hold_request(Some("k"), hold_body(t.event_id, &["A1"], user))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&t.router, hold_request(Some("k"), hold_body(t.event_id, &["A2"], user))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_of(&body)["kind"], "idempotency_key_reused");
    assert_eq!(t.state.ledger().availability(&t.event_id).unwrap().held, 1);
}

#[tokio::test]
async fn test_seat_order_does_not_change_fingerprint() {
    let t = test_app(&["A1", "A2"]);
    let user = Uuid::new_v4();

    let (_, first) = send(&t.router, hold_request(Some("k"), hold_body(t.event_id, &["A1", "A2"], user))).await;
    let (status, second) = send(&t.router, hold_request(Some("k"), hold_body(t.event_id, &["A2", "A1"], user))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_bad_input_never_reaches_idempotency() {
    let t = test_app(&["A1"]);
    let body = hold_body(t.event_id, &["A1"], Uuid::new_v4());

    let (status, missing) = send(&t.router, hold_request(None, body.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&missing)["kind"], "missing_idempotency_key");

    let (status, malformed) = send(&t.router, hold_request(Some("k"), "{\"event_id\": ".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&malformed)["kind"], "invalid_request");

    let (status, _) = send(&t.router, hold_request(Some("k"), json!({"seats": ["A1"]}).to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(t.state.allocator.idempotency().is_empty());
    let (status, _) = send(&t.router, hold_request(Some("k"), body)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_validation_errors_are_cached() {
    let t = test_app(&["A1"]);
    let body = hold_body(t.event_id, &["A1", "A1"], Uuid::new_v4());

    let (status, first) = send(&t.router, hold_request(Some("dup"), body.clone())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&first)["kind"], "invalid_request");

    let (_, replay) = send(&t.router, hold_request(Some("dup"), body)).await;
    assert_eq!(replay, first);
    assert_eq!(t.state.metrics.idempotent_replays.get(), 1);
}

#[tokio::test]
async fn test_unknown_event_and_hold() {
    let t = test_app(&["A1"]);

    let (status, body) = send(&t.router, hold_request(Some("k"), hold_body(Uuid::new_v4(), &["A1"], Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_of(&body)["kind"], "event_not_found");

    let (status, body) = send(&t.router, empty("GET", format!("/v1/holds/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_of(&body)["kind"], "hold_not_found");

    let (status, _) = send(&t.router, empty("GET", format!("/v1/events/{}/seats", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_confirm_and_release_lifecycle() {
    let t = test_app(&["A1", "A2"]);
    let (_, booked) = send(&t.router, hold_request(Some("k1"), hold_body(t.event_id, &["A1"], Uuid::new_v4()))).await;
    let booked = json_of(&booked)["hold_id"].as_str().unwrap().to_string();
    let (_, released) = send(&t.router, hold_request(Some("k2"), hold_body(t.event_id, &["A2"], Uuid::new_v4()))).await;
    let released = json_of(&released)["hold_id"].as_str().unwrap().to_string();

    let (status, body) = send(&t.router, empty("POST", format!("/v1/holds/{}/confirm", booked))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["status"], "CONFIRMED");

    let (status, body) = send(&t.router, empty("DELETE", format!("/v1/holds/{}", booked))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_of(&body)["kind"], "invalid_state");

    for _ in 0..2 {
        let (status, body) = send(&t.router, empty("DELETE", format!("/v1/holds/{}", released))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["status"], "RELEASED");
    }

    let (_, hold) = send(&t.router, empty("GET", format!("/v1/holds/{}", booked))).await;
    assert_eq!(json_of(&hold)["status"], "CONFIRMED");

    let availability = t.state.ledger().availability(&t.event_id).unwrap();
    assert_eq!((availability.free, availability.booked), (1, 1));
    assert_eq!(t.state.metrics.holds_confirmed.get(), 1);
    assert_eq!(t.state.metrics.holds_released.get(), 1);
}

#[tokio::test]
async fn test_confirm_after_expiry_is_rejected() {
    let t = test_app(&["A1"]);
    let (_, receipt) = send(&t.router, hold_request(Some("k"), hold_body(t.event_id, &["A1"], Uuid::new_v4()))).await;
    let hold_id = json_of(&receipt)["hold_id"].as_str().unwrap().to_string();

    t.clock.advance(Duration::minutes(2));

    let (status, body) = send(&t.router, empty("POST", format!("/v1/holds/{}/confirm", hold_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_of(&body)["kind"], "invalid_state");

    let (_, hold) = send(&t.router, empty("GET", format!("/v1/holds/{}", hold_id))).await;
    assert_eq!(json_of(&hold)["status"], "EXPIRED");
    assert_eq!(t.state.ledger().availability(&t.event_id).unwrap().free, 1);
}

#[tokio::test]
async fn test_confirm_after_expiry_publishes_expiry() {
    let t = test_app(&["A1"]);
    let (_, receipt) = send(&t.router, hold_request(Some("k"), hold_body(t.event_id, &["A1"], Uuid::new_v4()))).await;
    let hold_id: Uuid = json_of(&receipt)["hold_id"].as_str().unwrap().parse().unwrap();

    let mut notifications = t.state.notifier.subscribe();
    t.clock.advance(Duration::minutes(2));

    let (status, _) = send(&t.router, empty("POST", format!("/v1/holds/{}/confirm", hold_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    match notifications.try_recv().unwrap() {
        HoldNotification::HoldExpired { hold_id: id, seats, .. } => {
            assert_eq!(id, hold_id);
            assert_eq!(seats, vec!["A1".to_string()]);
        }
        other => panic!("unexpected notification {:?}", other),
    }
    assert_eq!(t.state.metrics.holds_expired.get(), 1);
    assert_eq!(t.state.metrics.holds_confirmed.get(), 0);

    // A second attempt sees a plain expired hold and publishes nothing
    let (status, _) = send(&t.router, empty("POST", format!("/v1/holds/{}/confirm", hold_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(notifications.try_recv().is_err());
    assert_eq!(t.state.metrics.holds_expired.get(), 1);
}

#[tokio::test]
async fn test_register_event() {
    let t = test_app(&["A1"]);
    let event_id = Uuid::new_v4();
    let request = |body: Value| {
        Request::builder()
            .method("POST")
            .uri("/v1/events")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    };

    let (status, body) = send(&t.router, request(json!({"event_id": event_id, "name": "Encore", "seats": ["B1", "B2"]}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json_of(&body)["id"], json!(event_id));

    let (status, body) = send(&t.router, request(json!({"event_id": event_id, "name": "Encore", "seats": ["B1"]}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_of(&body)["kind"], "event_already_exists");

    let (status, _) = send(&t.router, request(json!({"name": "Empty", "seats": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&t.router, request(json!({"name": "No seats"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["kind"], "invalid_request");

    let (status, _) = send(&t.router, hold_request(Some("k"), hold_body(event_id, &["B2"], Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::CREATED);
}

fn from_peer(mut request: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let mut config = Config::default();
    config.rate_limit.requests_per_window = 2;
    config.rate_limit.window_seconds = 10;
    let state = AppState::from_config(&config, clock.clone()).unwrap();
    let router = app(state.clone());
    let healthz = || empty("GET", "/v1/healthz".to_string());

    for _ in 0..2 {
        let (status, _) = send(&router, from_peer(healthz(), "10.0.0.1:4000")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = router.clone().oneshot(from_peer(healthz(), "10.0.0.1:4001")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "10");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(json_of(&body), json!({"error": "Rate limit exceeded", "kind": "rate_limited"}));

    let (status, _) = send(&router, from_peer(healthz(), "10.0.0.2:4000")).await;
    assert_eq!(status, StatusCode::OK);
    // In-process requests carry no peer address
    let (status, _) = send(&router, healthz()).await;
    assert_eq!(status, StatusCode::OK);

    clock.advance(Duration::seconds(10));
    let (status, _) = send(&router, from_peer(healthz(), "10.0.0.1:4000")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.metrics.rate_limited.get(), 1);
}

#[tokio::test]
async fn test_rate_limit_switch() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let mut config = Config::default();
    config.rate_limit.enabled = false;
    config.rate_limit.requests_per_window = 1;
    let state = AppState::from_config(&config, clock).unwrap();
    assert!(state.rate_limiter.is_none());

    let router = app(state);
    for _ in 0..3 {
        let request = from_peer(empty("GET", "/v1/healthz".to_string()), "10.0.0.1:4000");
        let (status, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[test]
fn test_invalid_config_is_refused() {
    let mut config = Config::default();
    config.holds.ttl_seconds = u64::MAX;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    assert!(AppState::from_config(&config, clock).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_single_winner() {
    let t = test_app(&["A1", "A2", "A3"]);
    let barrier = Arc::new(tokio::sync::Barrier::new(32));

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let router = t.router.clone();
            let barrier = Arc::clone(&barrier);
            let body = hold_body(t.event_id, &["A2", "A3"], Uuid::new_v4());
            tokio::spawn(async move {
                barrier.wait().await;
                send(&router, hold_request(Some(&format!("key-{}", i)), body)).await
            })
        })
        .collect();

    let mut created = 0;
    let mut conflicts = 0;
    for task in tasks {
        let (status, body) = task.await.unwrap();
        match status {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => {
                assert_eq!(json_of(&body)["kind"], "seat_unavailable");
                conflicts += 1;
            }
            other => panic!("unexpected status {}", other),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(conflicts, 31);
    let availability = t.state.ledger().availability(&t.event_id).unwrap();
    assert_eq!((availability.free, availability.held), (1, 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retries_execute_once() {
    let t = test_app(&["A1"]);
    let body = hold_body(t.event_id, &["A1"], Uuid::new_v4());
    let barrier = Arc::new(tokio::sync::Barrier::new(16));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let router = t.router.clone();
            let barrier = Arc::clone(&barrier);
            let body = body.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                send(&router, hold_request(Some("same-key"), body)).await
            })
        })
        .collect();

    let mut receipts = Vec::new();
    for task in tasks {
        let (status, body) = task.await.unwrap();
        match status {
            StatusCode::CREATED => receipts.push(body),
            StatusCode::CONFLICT => assert_eq!(json_of(&body)["kind"], "request_in_flight"),
            other => panic!("unexpected status {}", other),
        }
    }

    assert!(!receipts.is_empty());
    assert!(receipts.iter().all(|r| *r == receipts[0]));
    assert_eq!(t.state.metrics.holds_created.get(), 1);
    assert_eq!(t.state.ledger().availability(&t.event_id).unwrap().held, 1);
}

#[tokio::test]
async fn test_stream_delivers_event_notifications() {
    let t = test_app(&["A1"]);

    let response = t
        .router
        .clone()
        .oneshot(empty("GET", format!("/v1/events/{}/stream", t.event_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut frames = response.into_body().into_data_stream();

    let (status, _) = send(&t.router, hold_request(Some("k"), hold_body(t.event_id, &["A1"], Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::CREATED);

    let frame = tokio::time::timeout(std::time::Duration::from_secs(2), frames.next())
        .await
        .expect("no notification streamed")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    assert!(text.contains("event: hold_created"));
    assert!(text.contains("\"seats\":[\"A1\"]"));

    let (status, _) = send(&t.router, empty("GET", format!("/v1/events/{}/stream", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let t = test_app(&["A1"]);

    let (status, body) = send(&t.router, empty("GET", "/v1/healthz".to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    let (status, body) = send(&t.router, empty("GET", "/v1/readyz".to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["events"], 1);

    send(&t.router, hold_request(Some("k"), hold_body(t.event_id, &["A1"], Uuid::new_v4()))).await;
    let (status, body) = send(&t.router, empty("GET", "/metrics".to_string())).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("seathold_holds_created_total 1"));
    assert!(text.contains("seathold_allocation_duration_seconds_count 1"));
}
