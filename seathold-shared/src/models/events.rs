use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Hold lifecycle notification fanned out to stream subscribers
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HoldNotification {
    HoldCreated {
        event_id: Uuid,
        hold_id: Uuid,
        seats: Vec<String>,
        expires_at: DateTime<Utc>,
    },
    HoldReleased {
        event_id: Uuid,
        hold_id: Uuid,
        seats: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    HoldConfirmed {
        event_id: Uuid,
        hold_id: Uuid,
        seats: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    HoldExpired {
        event_id: Uuid,
        hold_id: Uuid,
        seats: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl HoldNotification {
    pub fn event_id(&self) -> Uuid {
        match self {
            HoldNotification::HoldCreated { event_id, .. }
            | HoldNotification::HoldReleased { event_id, .. }
            | HoldNotification::HoldConfirmed { event_id, .. }
            | HoldNotification::HoldExpired { event_id, .. } => *event_id,
        }
    }

    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            HoldNotification::HoldCreated { .. } => "hold_created",
            HoldNotification::HoldReleased { .. } => "hold_released",
            HoldNotification::HoldConfirmed { .. } => "hold_confirmed",
            HoldNotification::HoldExpired { .. } => "hold_expired",
        }
    }
}
