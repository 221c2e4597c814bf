//! Flow model — one row per prospect journey.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flow::status::{FlowStatus, PriorityLevel, SchedulingMode};
use crate::qualify::spam::SpamFlag;

/// One prospect's journey from form start to booking outcome.
///
/// The flow row is the only shared mutable state in the engine; all
/// coordination happens through the store's version check. Field groups mirror
/// the persisted columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    // ── Identity ────────────────────────────────────────────────────
    pub id: Uuid,
    /// Owning tenant.
    pub organization_id: Uuid,
    /// Originating form.
    pub form_id: Uuid,
    /// Linked form response (unique per flow once set).
    pub response_id: Option<Uuid>,
    /// Meeting type the prospect is booking against.
    pub event_type_id: Option<Uuid>,
    /// Linked booking (unique per flow; nulled if the booking is deleted).
    pub booking_id: Option<Uuid>,

    // ── Mutable state ───────────────────────────────────────────────
    pub status: FlowStatus,
    pub scheduling_mode: SchedulingMode,
    /// Zero-based index of the question the respondent is on.
    pub current_step: u32,
    /// 0–100 form progress.
    pub completion_percentage: u8,
    /// Optimistic-concurrency version; bumped on every committed mutation.
    pub version: i64,

    // ── AI outputs ──────────────────────────────────────────────────
    /// 0–100, None until qualification completes.
    pub qualification_score: Option<u8>,
    /// 1–100 buying-intent estimate.
    pub intent_score: Option<u8>,
    pub priority_level: Option<PriorityLevel>,
    pub prospect_summary: Option<String>,

    // ── Anti-abuse ──────────────────────────────────────────────────
    pub spam_score: u8,
    pub spam_flags: Vec<SpamFlag>,
    /// Approval-mode hold: a human must approve before booking opens.
    pub requires_approval: bool,
    /// Oracle retries exhausted; awaiting a reviewer verdict.
    pub needs_manual_review: bool,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub email_verified: bool,
    pub email_verified_at: Option<DateTime<Utc>>,

    // ── Lifecycle timestamps ────────────────────────────────────────
    pub started_at: DateTime<Utc>,
    pub form_completed_at: Option<DateTime<Utc>>,
    pub qualification_completed_at: Option<DateTime<Utc>>,
    pub scheduling_started_at: Option<DateTime<Utc>>,
    pub booking_completed_at: Option<DateTime<Utc>>,
    pub abandoned_at: Option<DateTime<Utc>>,
    /// Updated unconditionally on every interaction, terminal ones included.
    pub last_active_at: DateTime<Utc>,
}

impl Flow {
    /// Create a fresh flow in `FormStarted`.
    pub fn new(
        organization_id: Uuid,
        form_id: Uuid,
        event_type_id: Option<Uuid>,
        scheduling_mode: SchedulingMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            form_id,
            response_id: None,
            event_type_id,
            booking_id: None,
            status: FlowStatus::FormStarted,
            scheduling_mode,
            current_step: 0,
            completion_percentage: 0,
            version: 0,
            qualification_score: None,
            intent_score: None,
            priority_level: None,
            prospect_summary: None,
            spam_score: 0,
            spam_flags: Vec::new(),
            requires_approval: scheduling_mode == SchedulingMode::Approval,
            needs_manual_review: false,
            approved_by: None,
            approved_at: None,
            email_verified: false,
            email_verified_at: None,
            started_at: now,
            form_completed_at: None,
            qualification_completed_at: None,
            scheduling_started_at: None,
            booking_completed_at: None,
            abandoned_at: None,
            last_active_at: now,
        }
    }

    /// Stamp the lifecycle timestamp that corresponds to entering `status`.
    ///
    /// `last_active_at` is always refreshed by the engine separately; this
    /// only fills the milestone columns.
    pub fn stamp_entry(&mut self, status: FlowStatus, at: DateTime<Utc>) {
        match status {
            FlowStatus::FormCompleted => self.form_completed_at = Some(at),
            FlowStatus::Qualified | FlowStatus::Disqualified | FlowStatus::SpamDetected => {
                self.qualification_completed_at = Some(at)
            }
            FlowStatus::SchedulingOptions => self.scheduling_started_at = Some(at),
            FlowStatus::BookingConfirmed | FlowStatus::BookingFailed => {
                self.booking_completed_at = Some(at)
            }
            FlowStatus::Abandoned => self.abandoned_at = Some(at),
            FlowStatus::FormStarted | FlowStatus::Qualifying | FlowStatus::BookingPending => {}
        }
    }

    /// Minutes since the last interaction, relative to `now`.
    pub fn idle_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_active_at).num_minutes()
    }
}

/// Meeting-type configuration, fixed at setup time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventType {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub scheduling_mode: SchedulingMode,
    /// Aggregate score a prospect must reach; None accepts any score.
    pub minimum_qualification_score: Option<u8>,
    pub duration_minutes: u32,
    /// Slots must start at least this far in the future.
    pub buffer_minutes: u32,
    /// Max confirmed/pending bookings per calendar day; None is unlimited.
    pub daily_booking_limit: Option<u32>,
    /// Extra instructions appended to the qualification prompt.
    pub custom_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EventType {
    pub fn new(organization_id: Uuid, name: impl Into<String>, mode: SchedulingMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            scheduling_mode: mode,
            minimum_qualification_score: None,
            duration_minutes: 30,
            buffer_minutes: 60,
            daily_booking_limit: None,
            custom_prompt: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_minimum_score(mut self, score: u8) -> Self {
        self.minimum_qualification_score = Some(score);
        self
    }

    pub fn with_buffer_minutes(mut self, minutes: u32) -> Self {
        self.buffer_minutes = minutes;
        self
    }

    pub fn with_daily_limit(mut self, limit: u32) -> Self {
        self.daily_booking_limit = Some(limit);
        self
    }
}

/// A claimed meeting, pending or confirmed on the calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub slot_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

/// Calendar status of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_flow_starts_at_form_started() {
        let flow = Flow::new(Uuid::new_v4(), Uuid::new_v4(), None, SchedulingMode::Instant);
        assert_eq!(flow.status, FlowStatus::FormStarted);
        assert_eq!(flow.version, 0);
        assert!(!flow.requires_approval);
    }

    #[test]
    fn approval_mode_flow_requires_approval_from_birth() {
        let flow = Flow::new(Uuid::new_v4(), Uuid::new_v4(), None, SchedulingMode::Approval);
        assert!(flow.requires_approval);
    }

    #[test]
    fn stamp_entry_fills_matching_timestamp() {
        let mut flow = Flow::new(Uuid::new_v4(), Uuid::new_v4(), None, SchedulingMode::Instant);
        let now = Utc::now();
        flow.stamp_entry(FlowStatus::FormCompleted, now);
        assert_eq!(flow.form_completed_at, Some(now));
        assert!(flow.qualification_completed_at.is_none());

        flow.stamp_entry(FlowStatus::Abandoned, now);
        assert_eq!(flow.abandoned_at, Some(now));
    }
}
