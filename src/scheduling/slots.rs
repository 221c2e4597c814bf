//! Availability slots and booking-window rules.
//!
//! Capacity is claimed in the store via atomic conditional increment; this
//! module holds the model and the pure booking-window checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchedulingError;
use crate::flow::model::EventType;

/// A bookable interval with capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub event_type_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub max_bookings: u32,
    pub current_bookings: u32,
}

impl AvailabilitySlot {
    pub fn new(
        event_type_id: Uuid,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        max_bookings: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type_id,
            starts_at,
            ends_at,
            max_bookings,
            current_bookings: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.current_bookings >= self.max_bookings
    }

    /// Whether the slot starts far enough out to honor the buffer.
    pub fn honors_buffer(&self, event_type: &EventType, now: DateTime<Utc>) -> bool {
        self.starts_at >= now + chrono::Duration::minutes(i64::from(event_type.buffer_minutes))
    }
}

/// Validate a slot against the event type's booking window.
///
/// Capacity is NOT checked here — that's the store's atomic claim, so the
/// check-and-claim can't race.
pub fn check_bookable(
    slot: &AvailabilitySlot,
    event_type: &EventType,
    bookings_today: u32,
    now: DateTime<Utc>,
) -> Result<(), SchedulingError> {
    if !slot.honors_buffer(event_type, now) {
        return Err(SchedulingError::SlotNotBookable {
            slot_id: slot.id,
            reason: format!(
                "starts within the {}-minute buffer",
                event_type.buffer_minutes
            ),
        });
    }
    if let Some(limit) = event_type.daily_booking_limit {
        if bookings_today >= limit {
            return Err(SchedulingError::DailyLimitReached {
                event_type_id: event_type.id,
                limit,
            });
        }
    }
    Ok(())
}

/// Filter open slots for display: future, buffered, not full, honoring the
/// daily limit for the slot's day is left to booking time.
pub fn displayable<'a>(
    slots: &'a [AvailabilitySlot],
    event_type: &EventType,
    now: DateTime<Utc>,
) -> Vec<&'a AvailabilitySlot> {
    slots
        .iter()
        .filter(|s| !s.is_full() && s.honors_buffer(event_type, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::status::SchedulingMode;

    fn event_type_with_buffer(buffer: u32) -> EventType {
        EventType::new(Uuid::new_v4(), "Demo", SchedulingMode::Instant).with_buffer_minutes(buffer)
    }

    fn slot_in(minutes: i64, event_type: &EventType) -> AvailabilitySlot {
        let starts = Utc::now() + chrono::Duration::minutes(minutes);
        AvailabilitySlot::new(event_type.id, starts, starts + chrono::Duration::minutes(30), 1)
    }

    #[test]
    fn buffer_excludes_near_slots() {
        let event_type = event_type_with_buffer(60);
        let now = Utc::now();
        let near = slot_in(30, &event_type);
        let far = slot_in(120, &event_type);
        assert!(!near.honors_buffer(&event_type, now));
        assert!(far.honors_buffer(&event_type, now));
    }

    #[test]
    fn full_slots_are_not_displayable() {
        let event_type = event_type_with_buffer(0);
        let mut slot = slot_in(120, &event_type);
        slot.current_bookings = slot.max_bookings;
        let slots = vec![slot];
        assert!(displayable(&slots, &event_type, Utc::now()).is_empty());
    }

    #[test]
    fn daily_limit_blocks_booking() {
        let event_type = event_type_with_buffer(0).with_daily_limit(2);
        let slot = slot_in(120, &event_type);
        let err = check_bookable(&slot, &event_type, 2, Utc::now()).unwrap_err();
        assert!(matches!(err, SchedulingError::DailyLimitReached { limit: 2, .. }));
        assert!(check_bookable(&slot, &event_type, 1, Utc::now()).is_ok());
    }
}
