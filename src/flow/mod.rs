//! Flow domain — status machine, model, event log, transition engine.

pub mod event;
pub mod machine;
pub mod model;
pub mod status;

pub use event::{EventPayload, FlowEvent, FlowEventKind};
pub use machine::FlowEngine;
pub use model::{Booking, BookingStatus, EventType, Flow};
pub use status::{FlowStatus, PriorityLevel, SchedulingMode};
