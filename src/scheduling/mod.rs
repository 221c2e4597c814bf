//! Scheduling — availability slots, booking capacity, and the mode dispatcher.

pub mod dispatcher;
pub mod slots;

pub use dispatcher::SchedulingDispatcher;
pub use slots::AvailabilitySlot;
