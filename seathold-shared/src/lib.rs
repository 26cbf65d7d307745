pub mod models;

pub use models::event::{Event, Seat, SeatState};
pub use models::events::HoldNotification;
pub use models::hold::{Hold, HoldReceipt, HoldStatus};
