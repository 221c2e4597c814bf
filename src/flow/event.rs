//! Flow event log — append-only ledger of every state change and user action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flow::status::FlowStatus;
use crate::qualify::spam::SpamFlag;

/// What kind of event this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEventKind {
    /// A status transition committed.
    StatusChanged,
    /// An abandoned flow was manually reopened.
    Reopened,
    /// Approval granted on an approval-mode flow.
    ApprovalGranted,
    /// Curated slots were generated for the flow.
    CuratedSlotsGenerated,
    /// Qualification routed to manual review after oracle retries ran out.
    ManualReviewRequested,
    /// A reviewer resolved a manual-review flow.
    ManualReviewResolved,
}

impl FlowEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusChanged => "status_changed",
            Self::Reopened => "reopened",
            Self::ApprovalGranted => "approval_granted",
            Self::CuratedSlotsGenerated => "curated_slots_generated",
            Self::ManualReviewRequested => "manual_review_requested",
            Self::ManualReviewResolved => "manual_review_resolved",
        }
    }
}

impl std::fmt::Display for FlowEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FlowEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status_changed" => Ok(Self::StatusChanged),
            "reopened" => Ok(Self::Reopened),
            "approval_granted" => Ok(Self::ApprovalGranted),
            "curated_slots_generated" => Ok(Self::CuratedSlotsGenerated),
            "manual_review_requested" => Ok(Self::ManualReviewRequested),
            "manual_review_resolved" => Ok(Self::ManualReviewResolved),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// Structured payload attached to an event, tagged by what happened.
///
/// Stored as a JSON TEXT column; the tag keeps old rows parseable as kinds
/// are added.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// No extra detail beyond the status pair.
    #[default]
    None,
    /// Qualification verdict detail.
    Qualification {
        score: u8,
        confidence: Option<f32>,
        reasons: Vec<String>,
    },
    /// Disqualifying-choice short-circuit.
    Disqualified { message: Option<String> },
    /// Spam gate tripped.
    Spam { score: u8, flags: Vec<SpamFlag> },
    /// A slot was claimed for booking.
    SlotClaimed { slot_id: Uuid, starts_at: DateTime<Utc> },
    /// The pending booking resolved.
    BookingResolved { booking_id: Uuid, confirmed: bool },
    /// Approval action detail.
    Approval { approved_by: String },
    /// Curated candidates proposed to the respondent.
    CuratedSlots { slot_ids: Vec<Uuid> },
    /// Reaped for inactivity.
    Inactivity { idle_minutes: i64 },
    /// Manual review detail.
    ManualReview { reviewer: Option<String>, qualified: Option<bool> },
}

/// One append-only entry in a flow's ledger.
///
/// Owned by exactly one flow; removed only by cascading flow deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub kind: FlowEventKind,
    pub previous_status: FlowStatus,
    pub new_status: FlowStatus,
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

impl FlowEvent {
    /// Build a status-change event for a committed transition.
    pub fn transition(
        flow_id: Uuid,
        previous: FlowStatus,
        new: FlowStatus,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id,
            kind: FlowEventKind::StatusChanged,
            previous_status: previous,
            new_status: new,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Build an event of an explicit kind (reopen, approval, review, ...).
    pub fn action(
        flow_id: Uuid,
        kind: FlowEventKind,
        previous: FlowStatus,
        new: FlowStatus,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id,
            kind,
            previous_status: previous,
            new_status: new,
            payload,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_roundtrips_through_json() {
        let payload = EventPayload::Qualification {
            score: 82,
            confidence: Some(0.91),
            reasons: vec!["budget confirmed".into()],
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""kind":"qualification""#));
        let back: EventPayload = serde_json::from_str(&json).unwrap();
        match back {
            EventPayload::Qualification { score, .. } => assert_eq!(score, 82),
            other => panic!("wrong payload variant: {other:?}"),
        }
    }

    #[test]
    fn transition_event_captures_status_pair() {
        let flow_id = Uuid::new_v4();
        let event = FlowEvent::transition(
            flow_id,
            FlowStatus::FormStarted,
            FlowStatus::FormCompleted,
            EventPayload::None,
        );
        assert_eq!(event.kind, FlowEventKind::StatusChanged);
        assert_eq!(event.previous_status, FlowStatus::FormStarted);
        assert_eq!(event.new_status, FlowStatus::FormCompleted);
    }
}
