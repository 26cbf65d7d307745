use seathold_shared::{Hold, HoldReceipt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{HoldError, HoldResult};
use crate::fingerprint::fingerprint;
use crate::idempotency::{IdempotencyStore, Reservation, StoredOutcome};
use crate::ledger::{first_duplicate, Confirmation, SeatLedger};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CreateHold {
    pub event_id: Uuid,
    pub seats: Vec<String>,
    pub user_id: Uuid,
}

/// Where a hold request is in its lifecycle.
///
/// `Received -> IdempotencyChecked -> SeatsReserved -> Completed`, or cut
/// short as `Replayed` (answered from the idempotency cache) or `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    IdempotencyChecked,
    SeatsReserved,
    Completed,
    Replayed,
    Rejected,
}

/// Result of one `create_hold` call and the phase it ended in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub phase: RequestPhase,
    pub outcome: HoldResult<HoldReceipt>,
}

impl Allocation {
    fn new(phase: RequestPhase, outcome: HoldResult<HoldReceipt>) -> Self {
        Self { phase, outcome }
    }

    pub fn is_replay(&self) -> bool {
        self.phase == RequestPhase::Replayed
    }
}

/// Abandons the in-flight key unless an outcome was recorded, so a panic
/// mid-request doesn't wedge the key until retention runs out.
struct InFlightGuard<'a> {
    store: &'a IdempotencyStore,
    key: &'a str,
    armed: bool,
}

impl<'a> InFlightGuard<'a> {
    fn new(store: &'a IdempotencyStore, key: &'a str) -> Self {
        Self { store, key, armed: true }
    }

    fn complete(mut self, outcome: StoredOutcome) {
        self.armed = false;
        self.store.complete(self.key, outcome);
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.store.abandon(self.key);
        }
    }
}

/// Runs hold requests against the ledger, at most once per idempotency key.
pub struct HoldAllocator {
    ledger: Arc<SeatLedger>,
    idempotency: Arc<IdempotencyStore>,
    clock: Arc<dyn Clock>,
    max_seats_per_hold: usize,
}

impl HoldAllocator {
    pub fn new(
        ledger: Arc<SeatLedger>,
        idempotency: Arc<IdempotencyStore>,
        clock: Arc<dyn Clock>,
        max_seats_per_hold: usize,
    ) -> Self {
        Self {
            ledger,
            idempotency,
            clock,
            max_seats_per_hold,
        }
    }

    pub fn ledger(&self) -> &Arc<SeatLedger> {
        &self.ledger
    }

    pub fn idempotency(&self) -> &Arc<IdempotencyStore> {
        &self.idempotency
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create a hold, or replay whatever the first request with this key got.
    ///
    /// Never awaits, so once started the request always reaches a recorded
    /// outcome even if the caller goes away.
    pub fn create_hold(&self, request: &CreateHold, idempotency_key: &str) -> Allocation {
        let mut phase = RequestPhase::Received;
        let now = self.clock.now();
        let fp = fingerprint(&request.event_id, &request.seats, &request.user_id);

        match self.idempotency.check_and_reserve(idempotency_key, &fp, now) {
            Reservation::Proceed => {}
            Reservation::Replay(outcome) => {
                debug!("Replaying outcome for idempotency key {}", idempotency_key);
                return Allocation::new(RequestPhase::Replayed, outcome.into_result());
            }
            Reservation::FingerprintConflict => {
                warn!("Idempotency key {} reused for a different request", idempotency_key);
                return Allocation::new(RequestPhase::Rejected, Err(HoldError::IdempotencyKeyReused));
            }
            Reservation::InFlight => {
                debug!("Idempotency key {} still in flight", idempotency_key);
                return Allocation::new(RequestPhase::Rejected, Err(HoldError::RequestInFlight));
            }
        }
        let guard = InFlightGuard::new(&self.idempotency, idempotency_key);
        phase = advance(phase, RequestPhase::IdempotencyChecked);

        let outcome = self.validate(request).and_then(|()| {
            self.ledger
                .try_hold(request.event_id, &request.seats, request.user_id, Uuid::new_v4(), now)
                .map(|hold| hold.receipt())
        });

        phase = match &outcome {
            Ok(receipt) => {
                phase = advance(phase, RequestPhase::SeatsReserved);
                info!(
                    "Hold {} created on event {} for seats {:?}",
                    receipt.hold_id, receipt.event_id, receipt.seats
                );
                advance(phase, RequestPhase::Completed)
            }
            Err(err) => {
                warn!("Hold request on event {} rejected: {}", request.event_id, err);
                advance(phase, RequestPhase::Rejected)
            }
        };

        guard.complete(StoredOutcome::from(outcome.clone()));
        Allocation::new(phase, outcome)
    }

    fn validate(&self, request: &CreateHold) -> HoldResult<()> {
        if request.seats.is_empty() {
            return Err(HoldError::invalid("seats must not be empty"));
        }
        if request.seats.len() > self.max_seats_per_hold {
            return Err(HoldError::invalid(format!(
                "at most {} seats per hold",
                self.max_seats_per_hold
            )));
        }
        if request.seats.iter().any(|label| label.trim().is_empty()) {
            return Err(HoldError::invalid("seat labels must not be blank"));
        }
        if let Some(dup) = first_duplicate(&request.seats) {
            return Err(HoldError::invalid(format!("seat {} requested twice", dup)));
        }
        Ok(())
    }

    pub fn confirm(&self, hold_id: Uuid) -> HoldResult<Confirmation> {
        let confirmation = self.ledger.confirm(hold_id, self.clock.now())?;
        match &confirmation {
            Confirmation::Confirmed(_) => info!("Hold {} confirmed", hold_id),
            Confirmation::Expired(_) => info!("Hold {} expired before it could be confirmed", hold_id),
        }
        Ok(confirmation)
    }

    /// Release a hold. The flag tells whether this call did the release or
    /// the hold had already left Active.
    pub fn release(&self, hold_id: Uuid) -> HoldResult<(Hold, bool)> {
        let (hold, released) = self.ledger.release(hold_id)?;
        if released {
            info!("Hold {} released", hold_id);
        } else {
            debug!("Hold {} already {}", hold_id, hold.status);
        }
        Ok((hold, released))
    }
}

fn advance(from: RequestPhase, to: RequestPhase) -> RequestPhase {
    debug!("Hold request {:?} -> {:?}", from, to);
    to
}
