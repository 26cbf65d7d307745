use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{Stream, StreamExt};
use seathold_core::{Availability, HoldError};
use seathold_shared::{Event, Seat};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/events", post(register_event))
        .route("/v1/events/{event_id}/seats", get(event_seats))
        .route("/v1/events/{event_id}/stream", get(event_stream))
}

#[derive(Debug, Deserialize)]
pub struct RegisterEventRequest {
    /// Generated when omitted
    pub event_id: Option<Uuid>,
    pub name: String,
    pub seats: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct EventSeatsResponse {
    pub event_id: Uuid,
    pub name: String,
    pub availability: Availability,
    pub seats: Vec<Seat>,
}

async fn register_event(
    State(state): State<AppState>,
    body: Result<Json<RegisterEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    let Json(req) =
        body.map_err(|rejection| AppError::bad_request("invalid_request", rejection.body_text()))?;
    let event = Event::with_id(req.event_id.unwrap_or_else(Uuid::new_v4), req.name, req.seats);
    state.ledger().register_event(event.clone())?;
    info!("Event {} registered with {} seats", event.id, event.seats.len());
    Ok((StatusCode::CREATED, Json(event)))
}

async fn event_seats(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<EventSeatsResponse>, AppError> {
    let ledger = state.ledger();
    let event = ledger.event(&event_id).ok_or(HoldError::EventNotFound { event_id })?;

    Ok(Json(EventSeatsResponse {
        event_id,
        name: event.name,
        availability: ledger.availability(&event_id)?,
        seats: ledger.seats(&event_id)?,
    }))
}

/// Server-sent hold lifecycle notifications for one event.
async fn event_stream(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, AppError> {
    if state.ledger().event(&event_id).is_none() {
        return Err(HoldError::EventNotFound { event_id }.into());
    }

    let rx = state.notifier.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(notification) if notification.event_id() == event_id => Some(
                SseEvent::default()
                    .event(notification.name())
                    .json_data(&notification),
            ),
            Ok(_) => None,
            Err(err) => {
                // Lagged: the subscriber missed some notifications
                warn!("Stream for event {} fell behind: {}", event_id, err);
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
