use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use seathold_shared::{Event, Hold, HoldStatus, Seat, SeatState};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{HoldError, HoldResult};

/// Seat state and holds of one event. Only ever touched under its mutex.
struct EventBook {
    event: Event,
    seats: HashMap<String, SeatState>,
    holds: HashMap<Uuid, Hold>,
}

impl EventBook {
    fn new(event: Event) -> Self {
        let seats = event
            .seats
            .iter()
            .map(|label| (label.clone(), SeatState::Free))
            .collect();

        Self {
            event,
            seats,
            holds: HashMap::new(),
        }
    }

    fn status_of(&self, hold_id: &Uuid) -> HoldResult<HoldStatus> {
        self.holds
            .get(hold_id)
            .map(|hold| hold.status)
            .ok_or(HoldError::HoldNotFound { hold_id: *hold_id })
    }

    /// Move an Active hold to `status` and rewrite its seats accordingly.
    /// Callers have already checked the hold is Active.
    fn finish(&mut self, hold_id: &Uuid, status: HoldStatus) -> HoldResult<Hold> {
        let hold = self
            .holds
            .get_mut(hold_id)
            .ok_or(HoldError::HoldNotFound { hold_id: *hold_id })?;
        hold.status = status;
        let hold = hold.clone();

        for label in &hold.seats {
            if let Some(seat) = self.seats.get_mut(label) {
                if seat.hold_id() != Some(hold.id) {
                    continue;
                }
                *seat = match status {
                    HoldStatus::Confirmed => SeatState::Booked {
                        hold_id: hold.id,
                        user_id: hold.user_id,
                    },
                    _ => SeatState::Free,
                };
            }
        }

        Ok(hold)
    }
}

pub(crate) fn first_duplicate(labels: &[String]) -> Option<&String> {
    let mut seen = HashSet::new();
    labels.iter().find(|label| !seen.insert(label.as_str()))
}

/// What a confirm call did to an Active hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed(Hold),
    /// Already past its expiry, so it was expired instead of booked.
    Expired(Hold),
}

impl Confirmation {
    pub fn hold(&self) -> &Hold {
        match self {
            Confirmation::Confirmed(hold) | Confirmation::Expired(hold) => hold,
        }
    }

    /// The booked hold, or the `InvalidState` a caller sees for an expired one.
    pub fn into_result(self) -> HoldResult<Hold> {
        match self {
            Confirmation::Confirmed(hold) => Ok(hold),
            Confirmation::Expired(hold) => Err(HoldError::InvalidState {
                hold_id: hold.id,
                status: HoldStatus::Expired,
            }),
        }
    }
}

/// Seat counts for an event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub struct Availability {
    pub total: usize,
    pub free: usize,
    pub held: usize,
    pub booked: usize,
}

/// Authoritative seat state for every event.
///
/// Each event sits behind its own mutex, so holds on different events never
/// contend. Holds are indexed by id to find their event without a scan.
pub struct SeatLedger {
    hold_ttl: Duration,
    books: DashMap<Uuid, Arc<Mutex<EventBook>>>,
    hold_index: DashMap<Uuid, Uuid>,
}

impl SeatLedger {
    pub fn new(hold_ttl: Duration) -> Self {
        debug_assert!(hold_ttl > Duration::zero(), "hold ttl must be positive");
        Self {
            hold_ttl,
            books: DashMap::new(),
            hold_index: DashMap::new(),
        }
    }

    /// Install an event with every seat free.
    pub fn register_event(&self, event: Event) -> HoldResult<()> {
        if event.seats.is_empty() {
            return Err(HoldError::invalid("event must have at least one seat"));
        }
        if event.seats.iter().any(|label| label.trim().is_empty()) {
            return Err(HoldError::invalid("seat labels must not be blank"));
        }
        if let Some(dup) = first_duplicate(&event.seats) {
            return Err(HoldError::invalid(format!("duplicate seat label {}", dup)));
        }

        match self.books.entry(event.id) {
            Entry::Occupied(_) => Err(HoldError::EventAlreadyExists { event_id: event.id }),
            Entry::Vacant(slot) => {
                info!("Registered event {} with {} seats", event.id, event.seats.len());
                slot.insert(Arc::new(Mutex::new(EventBook::new(event))));
                Ok(())
            }
        }
    }

    fn book(&self, event_id: &Uuid) -> HoldResult<Arc<Mutex<EventBook>>> {
        // The shard guard must be gone before the event mutex is taken.
        self.books
            .get(event_id)
            .map(|book| Arc::clone(book.value()))
            .ok_or(HoldError::EventNotFound { event_id: *event_id })
    }

    fn book_for_hold(&self, hold_id: &Uuid) -> HoldResult<Arc<Mutex<EventBook>>> {
        let event_id = self
            .hold_index
            .get(hold_id)
            .map(|entry| *entry.value())
            .ok_or(HoldError::HoldNotFound { hold_id: *hold_id })?;
        self.book(&event_id)
    }

    /// Hold every requested seat or none of them.
    pub fn try_hold(
        &self,
        event_id: Uuid,
        seats: &[String],
        user_id: Uuid,
        hold_id: Uuid,
        now: DateTime<Utc>,
    ) -> HoldResult<Hold> {
        let handle = self.book(&event_id)?;
        let mut book = handle.lock();

        if seats.is_empty() || first_duplicate(seats).is_some() {
            return Err(HoldError::invalid("seats must be a non-empty list without duplicates"));
        }

        let unknown: Vec<String> = seats
            .iter()
            .filter(|label| !book.seats.contains_key(label.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(HoldError::UnknownSeat { event_id, seats: unknown });
        }

        let taken: Vec<String> = seats
            .iter()
            .filter(|label| !book.seats[label.as_str()].is_free())
            .cloned()
            .collect();
        if !taken.is_empty() {
            debug!("Seats {:?} on event {} already taken", taken, event_id);
            return Err(HoldError::SeatUnavailable { event_id, seats: taken });
        }

        if self.hold_index.contains_key(&hold_id) {
            return Err(HoldError::invalid(format!("hold id {} already in use", hold_id)));
        }

        let expires_at = now
            .checked_add_signed(self.hold_ttl)
            .ok_or_else(|| HoldError::invalid("hold expiry is out of range"))?;
        let hold = Hold::new(hold_id, event_id, seats.to_vec(), user_id, now, expires_at);
        for label in seats {
            book.seats.insert(
                label.clone(),
                SeatState::Held {
                    hold_id,
                    user_id,
                    expires_at: hold.expires_at,
                },
            );
        }
        book.holds.insert(hold_id, hold.clone());
        self.hold_index.insert(hold_id, event_id);

        Ok(hold)
    }

    /// Give an Active hold's seats back. Releasing twice, or releasing an
    /// expired hold, returns the hold unchanged. The flag is true only for
    /// the call that moved the hold out of Active.
    pub fn release(&self, hold_id: Uuid) -> HoldResult<(Hold, bool)> {
        let handle = self.book_for_hold(&hold_id)?;
        let mut book = handle.lock();

        match book.status_of(&hold_id)? {
            HoldStatus::Active => Ok((book.finish(&hold_id, HoldStatus::Released)?, true)),
            HoldStatus::Released | HoldStatus::Expired => Ok((book.holds[&hold_id].clone(), false)),
            status @ HoldStatus::Confirmed => Err(HoldError::InvalidState { hold_id, status }),
        }
    }

    /// Turn an Active, unexpired hold into a booking.
    ///
    /// A hold past its expiry that the reaper has not reached yet is expired
    /// here instead and comes back as `Confirmation::Expired`.
    pub fn confirm(&self, hold_id: Uuid, now: DateTime<Utc>) -> HoldResult<Confirmation> {
        let handle = self.book_for_hold(&hold_id)?;
        let mut book = handle.lock();

        match book.status_of(&hold_id)? {
            HoldStatus::Active if book.holds[&hold_id].is_due(now) => {
                book.finish(&hold_id, HoldStatus::Expired).map(Confirmation::Expired)
            }
            HoldStatus::Active => book.finish(&hold_id, HoldStatus::Confirmed).map(Confirmation::Confirmed),
            status => Err(HoldError::InvalidState { hold_id, status }),
        }
    }

    /// Expire an Active hold whose expiry has passed.
    pub fn expire(&self, hold_id: Uuid, now: DateTime<Utc>) -> HoldResult<Hold> {
        let handle = self.book_for_hold(&hold_id)?;
        let mut book = handle.lock();

        let hold = book
            .holds
            .get(&hold_id)
            .ok_or(HoldError::HoldNotFound { hold_id })?;
        if !hold.is_due(now) {
            return Err(HoldError::InvalidState {
                hold_id,
                status: hold.status,
            });
        }
        book.finish(&hold_id, HoldStatus::Expired)
    }

    /// Active holds whose expiry is at or before `now`.
    pub fn due_holds(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.handles()
            .iter()
            .flat_map(|handle| {
                let book = handle.lock();
                book.holds
                    .values()
                    .filter(|hold| hold.is_due(now))
                    .map(|hold| hold.id)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Drop expired and released holds that ended before `before`.
    /// Confirmed holds are bookings and stay.
    pub fn prune_finished(&self, before: DateTime<Utc>) -> usize {
        let mut pruned = 0;
        for handle in self.handles() {
            let mut book = handle.lock();
            let stale: Vec<Uuid> = book
                .holds
                .values()
                .filter(|hold| {
                    matches!(hold.status, HoldStatus::Expired | HoldStatus::Released)
                        && hold.expires_at < before
                })
                .map(|hold| hold.id)
                .collect();

            for hold_id in stale {
                book.holds.remove(&hold_id);
                self.hold_index.remove(&hold_id);
                pruned += 1;
            }
        }
        pruned
    }

    fn handles(&self) -> Vec<Arc<Mutex<EventBook>>> {
        self.books.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn hold(&self, hold_id: &Uuid) -> Option<Hold> {
        let handle = self.book_for_hold(hold_id).ok()?;
        let book = handle.lock();
        book.holds.get(hold_id).cloned()
    }

    pub fn event(&self, event_id: &Uuid) -> Option<Event> {
        let handle = self.book(event_id).ok()?;
        let book = handle.lock();
        Some(book.event.clone())
    }

    pub fn event_ids(&self) -> Vec<Uuid> {
        self.books.iter().map(|entry| *entry.key()).collect()
    }

    /// Seats of an event in the order the event declared them.
    pub fn seats(&self, event_id: &Uuid) -> HoldResult<Vec<Seat>> {
        let handle = self.book(event_id)?;
        let book = handle.lock();

        Ok(book
            .event
            .seats
            .iter()
            .map(|label| Seat {
                event_id: *event_id,
                label: label.clone(),
                state: book.seats[label.as_str()].clone(),
            })
            .collect())
    }

    pub fn availability(&self, event_id: &Uuid) -> HoldResult<Availability> {
        let handle = self.book(event_id)?;
        let book = handle.lock();

        let mut counts = Availability {
            total: book.seats.len(),
            ..Availability::default()
        };
        for state in book.seats.values() {
            match state {
                SeatState::Free => counts.free += 1,
                SeatState::Held { .. } => counts.held += 1,
                SeatState::Booked { .. } => counts.booked += 1,
            }
        }
        Ok(counts)
    }

    pub fn active_holds(&self, event_id: &Uuid) -> HoldResult<Vec<Hold>> {
        let handle = self.book(event_id)?;
        let book = handle.lock();
        Ok(book.holds.values().filter(|hold| hold.is_active()).cloned().collect())
    }
}
