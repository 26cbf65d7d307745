pub mod event;
pub mod events;
pub mod hold;
