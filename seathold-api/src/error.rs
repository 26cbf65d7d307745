use axum::{
    http::{header::RETRY_AFTER, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use seathold_core::HoldError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    /// A domain failure, mapped by kind.
    Hold(HoldError),
    /// Malformed HTTP input caught before the allocator runs.
    BadRequest { kind: &'static str, message: String },
    RateLimited { retry_after_seconds: u64 },
    Anyhow(anyhow::Error),
}

impl AppError {
    pub fn bad_request(kind: &'static str, message: impl Into<String>) -> Self {
        AppError::BadRequest { kind, message: message.into() }
    }
}

pub fn status_for(err: &HoldError) -> StatusCode {
    match err {
        HoldError::InvalidRequest { .. } | HoldError::UnknownSeat { .. } => StatusCode::BAD_REQUEST,
        HoldError::EventNotFound { .. } | HoldError::HoldNotFound { .. } => StatusCode::NOT_FOUND,
        HoldError::SeatUnavailable { .. }
        | HoldError::IdempotencyKeyReused
        | HoldError::RequestInFlight
        | HoldError::InvalidState { .. }
        | HoldError::EventAlreadyExists { .. } => StatusCode::CONFLICT,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Hold(err) => {
                let status = status_for(&err);
                let mut body = json!({
                    "error": err.to_string(),
                    "kind": err.kind(),
                });
                if let Some(seats) = err.seats() {
                    body["seats"] = json!(seats);
                }
                (status, Json(body)).into_response()
            }
            AppError::BadRequest { kind, message } => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message, "kind": kind })),
            )
                .into_response(),
            AppError::RateLimited { retry_after_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, retry_after_seconds.to_string())],
                Json(json!({ "error": "Rate limit exceeded", "kind": "rate_limited" })),
            )
                .into_response(),
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal Server Error", "kind": "internal" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<HoldError> for AppError {
    fn from(err: HoldError) -> Self {
        AppError::Hold(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Anyhow(err)
    }
}
