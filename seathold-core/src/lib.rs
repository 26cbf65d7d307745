pub mod allocator;
pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod idempotency;
pub mod ledger;
pub mod reaper;

pub use allocator::{Allocation, CreateHold, HoldAllocator, RequestPhase};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{HoldError, HoldResult};
pub use idempotency::{IdempotencyStore, Reservation, StoredOutcome};
pub use ledger::{Availability, Confirmation, SeatLedger};
pub use reaper::{HoldExpiryReaper, ReapReport};
