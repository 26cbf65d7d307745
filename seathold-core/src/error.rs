use seathold_shared::HoldStatus;
use uuid::Uuid;

/// Every failure a hold operation can surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HoldError {
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Unknown seats for event {event_id}: {}", .seats.join(", "))]
    UnknownSeat { event_id: Uuid, seats: Vec<String> },

    #[error("Event not found: {event_id}")]
    EventNotFound { event_id: Uuid },

    #[error("Event already exists: {event_id}")]
    EventAlreadyExists { event_id: Uuid },

    #[error("Hold not found: {hold_id}")]
    HoldNotFound { hold_id: Uuid },

    #[error("Seats unavailable: {}", .seats.join(", "))]
    SeatUnavailable { event_id: Uuid, seats: Vec<String> },

    #[error("Idempotency key was already used for a different request")]
    IdempotencyKeyReused,

    #[error("A request with this idempotency key is still being processed")]
    RequestInFlight,

    #[error("Hold {hold_id} is {status}")]
    InvalidState { hold_id: Uuid, status: HoldStatus },
}

impl HoldError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        HoldError::InvalidRequest { reason: reason.into() }
    }

    /// Stable machine-readable kind, sent as `kind` in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            HoldError::InvalidRequest { .. } => "invalid_request",
            HoldError::UnknownSeat { .. } => "unknown_seat",
            HoldError::EventNotFound { .. } => "event_not_found",
            HoldError::EventAlreadyExists { .. } => "event_already_exists",
            HoldError::HoldNotFound { .. } => "hold_not_found",
            HoldError::SeatUnavailable { .. } => "seat_unavailable",
            HoldError::IdempotencyKeyReused => "idempotency_key_reused",
            HoldError::RequestInFlight => "request_in_flight",
            HoldError::InvalidState { .. } => "invalid_state",
        }
    }

    /// Seat labels the error is about, for conflict and unknown-seat responses.
    pub fn seats(&self) -> Option<&[String]> {
        match self {
            HoldError::UnknownSeat { seats, .. } | HoldError::SeatUnavailable { seats, .. } => {
                Some(seats)
            }
            _ => None,
        }
    }
}

pub type HoldResult<T> = Result<T, HoldError>;
