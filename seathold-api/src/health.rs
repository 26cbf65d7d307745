use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/readyz", get(readyz))
}

async fn healthz() -> &'static str {
    "OK"
}

/// Ready once at least one event can take holds.
async fn readyz(State(state): State<AppState>) -> (axum::http::StatusCode, Json<Value>) {
    let events = state.ledger().event_ids().len();
    let status = if events > 0 {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": events > 0,
            "events": events,
            "idempotency_keys": state.allocator.idempotency().len(),
        })),
    )
}
