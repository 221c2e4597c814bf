//! Unified `FlowStore` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::analysis::{AiAnalysisSession, AnalysisKind, ProspectInsight, SchedulingRecommendation};
use crate::error::DatabaseError;
use crate::flow::event::FlowEvent;
use crate::flow::model::{Booking, BookingStatus, EventType, Flow};
use crate::forms::{Form, FormResponse};
use crate::scheduling::slots::AvailabilitySlot;

/// Backend-agnostic store covering flows, events, forms, analyses, and slots.
///
/// Single-flow serialization happens here: `update_flow` commits only when the
/// caller's expected version matches the row, so two racing transitions on one
/// flow resolve to one winner.
#[async_trait]
pub trait FlowStore: Send + Sync {
    // ── Flows ───────────────────────────────────────────────────────

    /// Insert a new flow. Fails on a duplicate response or booking link.
    async fn insert_flow(&self, flow: &Flow) -> Result<(), DatabaseError>;

    /// Get a flow by ID.
    async fn get_flow(&self, id: Uuid) -> Result<Option<Flow>, DatabaseError>;

    /// Version-checked write of a mutated flow.
    ///
    /// Persists `flow` with `version = expected_version + 1` only if the row
    /// still carries `expected_version`. Returns false when the row moved on —
    /// the caller maps that to a concurrency error and retries from a fresh
    /// read. Never partially applies.
    async fn update_flow(&self, flow: &Flow, expected_version: i64) -> Result<bool, DatabaseError>;

    /// All non-terminal flows, for the abandonment sweep.
    async fn list_active_flows(&self) -> Result<Vec<Flow>, DatabaseError>;

    /// Flows parked for a human qualification verdict.
    async fn list_review_queue(&self) -> Result<Vec<Flow>, DatabaseError>;

    // ── Event log ───────────────────────────────────────────────────

    /// Append one event to a flow's ledger. Events are never updated.
    async fn append_event(&self, event: &FlowEvent) -> Result<(), DatabaseError>;

    /// A flow's ledger, oldest first.
    async fn list_events(&self, flow_id: Uuid) -> Result<Vec<FlowEvent>, DatabaseError>;

    // ── Forms & responses ───────────────────────────────────────────

    async fn insert_form(&self, form: &Form) -> Result<(), DatabaseError>;

    async fn get_form(&self, id: Uuid) -> Result<Option<Form>, DatabaseError>;

    /// Delete a form. Fails with a constraint error while any of its flows is
    /// still active.
    async fn delete_form(&self, id: Uuid) -> Result<(), DatabaseError>;

    async fn insert_response(&self, response: &FormResponse) -> Result<(), DatabaseError>;

    async fn get_response(&self, id: Uuid) -> Result<Option<FormResponse>, DatabaseError>;

    // ── Event types ─────────────────────────────────────────────────

    async fn insert_event_type(&self, event_type: &EventType) -> Result<(), DatabaseError>;

    async fn get_event_type(&self, id: Uuid) -> Result<Option<EventType>, DatabaseError>;

    // ── Analysis sessions & derived outputs ─────────────────────────

    /// Record one oracle attempt. Sessions are immutable once written.
    async fn record_analysis_session(
        &self,
        session: &AiAnalysisSession,
    ) -> Result<(), DatabaseError>;

    /// A flow's sessions, oldest first.
    async fn list_analysis_sessions(
        &self,
        flow_id: Uuid,
    ) -> Result<Vec<AiAnalysisSession>, DatabaseError>;

    /// Whether a successful session of `kind` exists for the flow.
    async fn has_completed_session(
        &self,
        flow_id: Uuid,
        kind: AnalysisKind,
    ) -> Result<bool, DatabaseError>;

    /// Create or overwrite the flow's prospect insight (one per flow).
    async fn upsert_insight(&self, insight: &ProspectInsight) -> Result<(), DatabaseError>;

    async fn get_insight(&self, flow_id: Uuid) -> Result<Option<ProspectInsight>, DatabaseError>;

    /// Create or overwrite the flow's scheduling recommendation (one per flow).
    async fn upsert_recommendation(
        &self,
        recommendation: &SchedulingRecommendation,
    ) -> Result<(), DatabaseError>;

    async fn get_recommendation(
        &self,
        flow_id: Uuid,
    ) -> Result<Option<SchedulingRecommendation>, DatabaseError>;

    // ── Slots & bookings ────────────────────────────────────────────

    async fn insert_slot(&self, slot: &AvailabilitySlot) -> Result<(), DatabaseError>;

    async fn get_slot(&self, id: Uuid) -> Result<Option<AvailabilitySlot>, DatabaseError>;

    /// Open (not-full) future slots for an event type, soonest first.
    async fn list_open_slots(
        &self,
        event_type_id: Uuid,
        from: DateTime<Utc>,
    ) -> Result<Vec<AvailabilitySlot>, DatabaseError>;

    /// Atomically claim one unit of slot capacity.
    ///
    /// Conditional increment: returns false when the slot is already full.
    /// Never read-modify-write.
    async fn try_claim_slot(&self, slot_id: Uuid) -> Result<bool, DatabaseError>;

    /// Release one claimed unit (failed or cancelled booking).
    async fn release_slot(&self, slot_id: Uuid) -> Result<(), DatabaseError>;

    async fn insert_booking(&self, booking: &Booking) -> Result<(), DatabaseError>;

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, DatabaseError>;

    async fn update_booking_status(
        &self,
        id: Uuid,
        status: BookingStatus,
    ) -> Result<(), DatabaseError>;

    /// Delete a booking, nulling the owning flow's booking link (the flow
    /// survives booking cancellation). Returns whether a row was deleted.
    async fn delete_booking(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Non-cancelled bookings for an event type on a calendar day.
    async fn count_bookings_on_day(
        &self,
        event_type_id: Uuid,
        day: NaiveDate,
    ) -> Result<u32, DatabaseError>;

    // ── Analytics counters ──────────────────────────────────────────

    /// Atomic increment of a per-tenant counter (upsert, `value = value + 1`).
    async fn increment_counter(
        &self,
        organization_id: Uuid,
        name: &str,
    ) -> Result<(), DatabaseError>;

    async fn get_counter(
        &self,
        organization_id: Uuid,
        name: &str,
    ) -> Result<i64, DatabaseError>;
}
