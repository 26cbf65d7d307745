use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event with a fixed seat map. Seat labels never change after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub seats: Vec<String>,
}

impl Event {
    pub fn new(name: impl Into<String>, seats: Vec<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name, seats)
    }

    pub fn with_id(id: Uuid, name: impl Into<String>, seats: Vec<String>) -> Self {
        Self {
            id,
            name: name.into(),
            seats,
        }
    }
}

/// Current state of a single seat
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatState {
    Free,
    Held {
        hold_id: Uuid,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    Booked {
        hold_id: Uuid,
        user_id: Uuid,
    },
}

impl SeatState {
    pub fn is_free(&self) -> bool {
        matches!(self, SeatState::Free)
    }

    /// The hold currently occupying this seat, if any.
    pub fn hold_id(&self) -> Option<Uuid> {
        match self {
            SeatState::Free => None,
            SeatState::Held { hold_id, .. } | SeatState::Booked { hold_id, .. } => Some(*hold_id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seat {
    pub event_id: Uuid,
    pub label: String,
    #[serde(flatten)]
    pub state: SeatState,
}
