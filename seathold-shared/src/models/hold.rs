use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hold status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoldStatus {
    Active,
    Expired,
    Released,
    Confirmed,
}

impl HoldStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HoldStatus::Active => "ACTIVE",
            HoldStatus::Expired => "EXPIRED",
            HoldStatus::Released => "RELEASED",
            HoldStatus::Confirmed => "CONFIRMED",
        }
    }
}

impl std::fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A time-limited reservation of one or more seats for a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hold {
    pub id: Uuid,
    pub event_id: Uuid,
    pub seats: Vec<String>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: HoldStatus,
}

impl Hold {
    pub fn new(
        id: Uuid,
        event_id: Uuid,
        seats: Vec<String>,
        user_id: Uuid,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            event_id,
            seats,
            user_id,
            created_at,
            expires_at,
            status: HoldStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Active
    }

    /// Active and past its expiry.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at <= now
    }

    pub fn receipt(&self) -> HoldReceipt {
        HoldReceipt {
            hold_id: self.id,
            event_id: self.event_id,
            seats: self.seats.clone(),
            user_id: self.user_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Snapshot of a hold taken when it was created.
///
/// This is what gets cached against an idempotency key, so it carries no
/// status: a replay must look exactly like the first response even after
/// the hold has expired or been confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HoldReceipt {
    pub hold_id: Uuid,
    pub event_id: Uuid,
    pub seats: Vec<String>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
