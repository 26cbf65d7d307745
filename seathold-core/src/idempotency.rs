use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use seathold_shared::HoldReceipt;
use tracing::{debug, warn};

use crate::error::{HoldError, HoldResult};

/// Final result of a hold request, as cached against its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredOutcome {
    Created(HoldReceipt),
    Rejected(HoldError),
}

impl StoredOutcome {
    pub fn into_result(self) -> HoldResult<HoldReceipt> {
        match self {
            StoredOutcome::Created(receipt) => Ok(receipt),
            StoredOutcome::Rejected(err) => Err(err),
        }
    }
}

impl From<HoldResult<HoldReceipt>> for StoredOutcome {
    fn from(result: HoldResult<HoldReceipt>) -> Self {
        match result {
            Ok(receipt) => StoredOutcome::Created(receipt),
            Err(err) => StoredOutcome::Rejected(err),
        }
    }
}

/// What the caller should do with a request after checking its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// First sighting. The key is now in flight and must be completed.
    Proceed,
    /// Already answered; return this verbatim.
    Replay(StoredOutcome),
    /// Another request with this key is still running.
    InFlight,
    /// Key was first used for a different request.
    FingerprintConflict,
}

#[derive(Debug, Clone)]
enum RecordState {
    InFlight,
    Completed(StoredOutcome),
}

#[derive(Debug, Clone)]
struct IdempotencyRecord {
    fingerprint: String,
    state: RecordState,
    created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    fn in_flight(fingerprint: &str, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint: fingerprint.to_string(),
            state: RecordState::InFlight,
            created_at: now,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        // A window reaching past the end of time never closes
        self.created_at
            .checked_add_signed(retention)
            .is_some_and(|end| end <= now)
    }
}

/// Remembers which idempotency keys have been seen and how they were answered.
///
/// Records live in a sharded map; every operation on a key goes through that
/// key's entry, so two requests with the same key are serialized while
/// unrelated keys are not.
pub struct IdempotencyStore {
    retention: Duration,
    records: DashMap<String, IdempotencyRecord>,
}

impl IdempotencyStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            records: DashMap::new(),
        }
    }

    pub fn check_and_reserve(&self, key: &str, fingerprint: &str, now: DateTime<Utc>) -> Reservation {
        match self.records.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(IdempotencyRecord::in_flight(fingerprint, now));
                Reservation::Proceed
            }
            Entry::Occupied(mut slot) => {
                // An old in-flight record is left for purge_expired to abandon
                let record = slot.get();
                if matches!(record.state, RecordState::Completed(_))
                    && record.is_expired(now, self.retention)
                {
                    debug!("Idempotency key {} past retention, starting over", key);
                    slot.insert(IdempotencyRecord::in_flight(fingerprint, now));
                    return Reservation::Proceed;
                }

                let record = slot.get();
                if record.fingerprint != fingerprint {
                    return Reservation::FingerprintConflict;
                }
                match &record.state {
                    RecordState::InFlight => Reservation::InFlight,
                    RecordState::Completed(outcome) => Reservation::Replay(outcome.clone()),
                }
            }
        }
    }

    /// Store the final outcome for an in-flight key.
    ///
    /// Returns false if the key is unknown or already completed; the first
    /// recorded outcome is never replaced.
    pub fn complete(&self, key: &str, outcome: StoredOutcome) -> bool {
        match self.records.get_mut(key) {
            Some(mut record) => {
                if matches!(record.state, RecordState::Completed(_)) {
                    warn!("Idempotency key {} completed twice, keeping first outcome", key);
                    return false;
                }
                record.state = RecordState::Completed(outcome);
                true
            }
            None => {
                warn!("Idempotency key {} vanished before completion", key);
                false
            }
        }
    }

    /// Forget an in-flight key so the request can be retried from scratch.
    pub fn abandon(&self, key: &str) -> bool {
        self.records
            .remove_if(key, |_, record| matches!(record.state, RecordState::InFlight))
            .is_some()
    }

    /// Drop every record older than the retention window. In-flight records
    /// that old belong to a request that never finished and are abandoned.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut purged = 0;
        self.records.retain(|key, record| {
            let keep = !record.is_expired(now, self.retention);
            if !keep {
                if matches!(record.state, RecordState::InFlight) {
                    warn!("Abandoning idempotency key {} still in flight past retention", key);
                }
                purged += 1;
            }
            keep
        });
        purged
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
