use seathold_core::{HoldError, SeatLedger};
use seathold_shared::Event;
use tracing::info;

use crate::app_config::EventSeed;

/// Register the configured events. Stops at the first event the ledger refuses.
pub fn seed_events(ledger: &SeatLedger, seeds: &[EventSeed]) -> Result<usize, HoldError> {
    for seed in seeds {
        let event = Event::with_id(seed.id, seed.name.clone(), seed.seat_labels());
        ledger.register_event(event)?;
        info!("Seeded event {} ({})", seed.name, seed.id);
    }
    Ok(seeds.len())
}
