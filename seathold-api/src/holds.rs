use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use seathold_core::{Confirmation, CreateHold, HoldError, RequestPhase};
use seathold_shared::{Hold, HoldNotification, HoldReceipt};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const IDEMPOTENCY_KEY: &str = "idempotency-key";
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/holds", post(create_hold))
        .route("/v1/holds/{hold_id}", get(get_hold).delete(release_hold))
        .route("/v1/holds/{hold_id}/confirm", post(confirm_hold))
}

fn idempotency_key(headers: &HeaderMap) -> Result<String, AppError> {
    let value = headers.get(IDEMPOTENCY_KEY).ok_or_else(|| {
        AppError::bad_request("missing_idempotency_key", "Idempotency-Key header is required")
    })?;

    let key = value.to_str().unwrap_or_default();
    if key.is_empty()
        || key.len() > MAX_IDEMPOTENCY_KEY_LEN
        || !key.bytes().all(|b| b.is_ascii_graphic())
    {
        return Err(AppError::bad_request(
            "invalid_idempotency_key",
            format!(
                "Idempotency-Key must be 1 to {} visible ASCII characters",
                MAX_IDEMPOTENCY_KEY_LEN
            ),
        ));
    }
    Ok(key.to_string())
}

/// `POST /v1/holds`
///
/// The key is checked before the body so a malformed request never reaches
/// the idempotency store.
async fn create_hold(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateHold>, JsonRejection>,
) -> Result<(StatusCode, Json<HoldReceipt>), AppError> {
    let key = idempotency_key(&headers)?;
    let Json(request) =
        body.map_err(|rejection| AppError::bad_request("invalid_request", rejection.body_text()))?;

    let timer = state.metrics.allocation_duration.start_timer();
    let allocation = state.allocator.create_hold(&request, &key);
    timer.observe_duration();
    state.metrics.record_allocation(&allocation);

    if allocation.phase == RequestPhase::Completed {
        if let Ok(receipt) = &allocation.outcome {
            state.notify(HoldNotification::HoldCreated {
                event_id: receipt.event_id,
                hold_id: receipt.hold_id,
                seats: receipt.seats.clone(),
                expires_at: receipt.expires_at,
            });
        }
    } else if allocation.is_replay() {
        debug!("Replayed idempotency key {}", key);
    }

    let receipt = allocation.outcome?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn get_hold(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
) -> Result<Json<Hold>, AppError> {
    state
        .ledger()
        .hold(&hold_id)
        .map(Json)
        .ok_or(AppError::Hold(HoldError::HoldNotFound { hold_id }))
}

/// `POST /v1/holds/{hold_id}/confirm`
///
/// A hold found past its expiry is expired on the spot. That is published
/// like a reaper expiry, since the reaper will never see the hold again.
async fn confirm_hold(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
) -> Result<Json<Hold>, AppError> {
    let confirmation = state.allocator.confirm(hold_id)?;
    let hold = confirmation.hold();
    let timestamp = state.allocator.clock().now();

    match &confirmation {
        Confirmation::Confirmed(_) => {
            state.metrics.holds_confirmed.inc();
            state.notify(HoldNotification::HoldConfirmed {
                event_id: hold.event_id,
                hold_id: hold.id,
                seats: hold.seats.clone(),
                timestamp,
            });
        }
        Confirmation::Expired(_) => {
            state.metrics.holds_expired.inc();
            state.notify(HoldNotification::HoldExpired {
                event_id: hold.event_id,
                hold_id: hold.id,
                seats: hold.seats.clone(),
                timestamp,
            });
        }
    }

    Ok(Json(confirmation.into_result()?))
}

/// `DELETE /v1/holds/{hold_id}`, safe to repeat.
async fn release_hold(
    State(state): State<AppState>,
    Path(hold_id): Path<Uuid>,
) -> Result<Json<Hold>, AppError> {
    let (hold, released) = state.allocator.release(hold_id)?;
    if released {
        state.metrics.holds_released.inc();
        state.notify(HoldNotification::HoldReleased {
            event_id: hold.event_id,
            hold_id: hold.id,
            seats: hold.seats.clone(),
            timestamp: state.allocator.clock().now(),
        });
    }
    Ok(Json(hold))
}
