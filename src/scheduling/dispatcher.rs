//! Scheduling mode dispatcher.
//!
//! The mode is fixed per event type; the dispatcher honors it when a flow
//! reaches `scheduling_options`: instant exposes open slots, curated proposes
//! 2–3 AI-picked candidates, approval holds the flow until a human approves.
//! Capacity is claimed by the store's atomic conditional increment — a full
//! slot fails the booking without touching the flow.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{AiAnalysisSession, AnalysisKind};
use crate::config::EngineConfig;
use crate::error::{Error, FlowError, SchedulingError};
use crate::flow::event::{EventPayload, FlowEventKind};
use crate::flow::machine::FlowEngine;
use crate::flow::model::{Booking, BookingStatus, EventType, Flow};
use crate::flow::status::{FlowStatus, SchedulingMode};
use crate::qualify::oracle::{OracleRequest, ScoringOracle};
use crate::qualify::prompts;
use crate::scheduling::slots::{self, AvailabilitySlot};

/// How many curated candidates to propose.
const CURATED_COUNT: usize = 3;

/// Candidate pool size offered to the oracle for curation.
const CURATION_POOL: usize = 8;

/// The scheduling mode dispatcher.
pub struct SchedulingDispatcher {
    engine: Arc<FlowEngine>,
    oracle: Arc<dyn ScoringOracle>,
    config: EngineConfig,
}

impl SchedulingDispatcher {
    pub fn new(
        engine: Arc<FlowEngine>,
        oracle: Arc<dyn ScoringOracle>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine,
            oracle,
            config,
        }
    }

    /// Move a qualified flow into `scheduling_options` and run the mode's
    /// entry work (curated generation, approval hold).
    pub async fn enter_scheduling(&self, flow_id: Uuid) -> Result<Flow, Error> {
        let flow = self
            .engine
            .transition(flow_id, FlowStatus::SchedulingOptions, EventPayload::None)
            .await?;

        match flow.scheduling_mode {
            SchedulingMode::Instant => Ok(flow),
            SchedulingMode::Approval => {
                // The hold flag is set at flow creation; re-assert in case the
                // event type changed mode since.
                if flow.requires_approval {
                    Ok(flow)
                } else {
                    Ok(self
                        .engine
                        .update_with(flow_id, |f| f.requires_approval = true)
                        .await?)
                }
            }
            SchedulingMode::Curated => {
                self.generate_curated(&flow).await?;
                Ok(self
                    .engine
                    .store()
                    .get_flow(flow_id)
                    .await?
                    .ok_or(FlowError::NotFound { id: flow_id })?)
            }
        }
    }

    /// Slots the respondent may pick from, per mode.
    pub async fn list_slots(&self, flow_id: Uuid) -> Result<Vec<AvailabilitySlot>, Error> {
        let store = self.engine.store();
        let flow = store
            .get_flow(flow_id)
            .await?
            .ok_or(FlowError::NotFound { id: flow_id })?;
        if flow.status != FlowStatus::SchedulingOptions {
            return Ok(Vec::new());
        }
        let Some(event_type) = self.event_type_of(&flow).await? else {
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let open = store.list_open_slots(event_type.id, now).await?;
        let visible: Vec<AvailabilitySlot> = match flow.scheduling_mode {
            SchedulingMode::Instant | SchedulingMode::Approval => {
                slots::displayable(&open, &event_type, now)
                    .into_iter()
                    .cloned()
                    .collect()
            }
            SchedulingMode::Curated => {
                let Some(mut recommendation) = store.get_recommendation(flow_id).await? else {
                    return Ok(Vec::new());
                };
                if recommendation.curated_viewed_at.is_none() {
                    recommendation.curated_viewed_at = Some(now);
                    recommendation.updated_at = now;
                    store.upsert_recommendation(&recommendation).await?;
                }
                open.into_iter()
                    .filter(|s| recommendation.curated_slot_ids.contains(&s.id))
                    .collect()
            }
        };

        self.engine.touch(flow_id).await?;
        Ok(visible)
    }

    /// Approval-mode approve action. Records who approved and when; a second
    /// approval is a no-op.
    pub async fn approve(&self, flow_id: Uuid, approved_by: &str) -> Result<Flow, Error> {
        let flow = self
            .engine
            .store()
            .get_flow(flow_id)
            .await?
            .ok_or(FlowError::NotFound { id: flow_id })?;
        if !flow.requires_approval {
            return Err(FlowError::PreconditionFailed {
                id: flow_id,
                target: FlowStatus::BookingPending,
                reason: "flow does not require approval".into(),
            }
            .into());
        }
        if flow.approved_at.is_some() {
            return Ok(flow);
        }

        let approved_by = approved_by.to_string();
        let now = Utc::now();
        let updated = self
            .engine
            .update_with(flow_id, |f| {
                f.approved_by = Some(approved_by.clone());
                f.approved_at = Some(now);
            })
            .await?;
        self.engine
            .append_action(
                flow_id,
                FlowEventKind::ApprovalGranted,
                EventPayload::Approval {
                    approved_by: updated.approved_by.clone().unwrap_or_default(),
                },
            )
            .await?;
        info!(flow_id = %flow_id, approved_by = %updated.approved_by.as_deref().unwrap_or(""), "Flow approved for booking");
        Ok(updated)
    }

    /// Book a slot: claim capacity atomically, create the booking, move the
    /// flow to `booking_pending`. A full slot fails with `SlotUnavailable`
    /// and leaves the flow untouched.
    pub async fn book(&self, flow_id: Uuid, slot_id: Uuid) -> Result<(Flow, Booking), Error> {
        let store = self.engine.store();
        let flow = store
            .get_flow(flow_id)
            .await?
            .ok_or(FlowError::NotFound { id: flow_id })?;
        if flow.status != FlowStatus::SchedulingOptions {
            return Err(FlowError::InvalidTransition {
                id: flow_id,
                from: flow.status,
                to: FlowStatus::BookingPending,
            }
            .into());
        }
        if flow.scheduling_mode == SchedulingMode::Approval && flow.approved_at.is_none() {
            return Err(SchedulingError::ApprovalRequired { flow_id }.into());
        }
        if flow.scheduling_mode == SchedulingMode::Curated {
            let curated = store
                .get_recommendation(flow_id)
                .await?
                .map(|r| r.curated_slot_ids)
                .unwrap_or_default();
            if !curated.contains(&slot_id) {
                return Err(SchedulingError::NotACuratedSlot { flow_id, slot_id }.into());
            }
        }

        let slot = store
            .get_slot(slot_id)
            .await?
            .ok_or(SchedulingError::SlotNotFound { slot_id })?;
        let now = Utc::now();
        if let Some(event_type) = self.event_type_of(&flow).await? {
            let bookings_today = store
                .count_bookings_on_day(event_type.id, slot.starts_at.date_naive())
                .await?;
            slots::check_bookable(&slot, &event_type, bookings_today, now)?;
        }

        if !store.try_claim_slot(slot_id).await? {
            return Err(SchedulingError::SlotUnavailable { slot_id }.into());
        }

        let booking = Booking {
            id: Uuid::new_v4(),
            flow_id,
            slot_id,
            starts_at: slot.starts_at,
            ends_at: slot.ends_at,
            status: BookingStatus::Pending,
            created_at: now,
        };
        store.insert_booking(&booking).await?;

        let booking_id = booking.id;
        let transitioned = self
            .engine
            .transition_with(
                flow_id,
                FlowStatus::BookingPending,
                EventPayload::SlotClaimed {
                    slot_id,
                    starts_at: slot.starts_at,
                },
                move |f| f.booking_id = Some(booking_id),
            )
            .await;

        match transitioned {
            Ok(flow) => {
                info!(flow_id = %flow_id, slot_id = %slot_id, booking_id = %booking.id, "Slot claimed");
                Ok((flow, booking))
            }
            Err(e) => {
                // Undo the claim; the flow row was never touched.
                if let Err(release_err) = store.release_slot(slot_id).await {
                    warn!(slot_id = %slot_id, error = %release_err, "Failed to release slot after booking rollback");
                }
                if let Err(delete_err) = store.delete_booking(booking.id).await {
                    warn!(booking_id = %booking.id, error = %delete_err, "Failed to delete booking after rollback");
                }
                Err(e)
            }
        }
    }

    /// Resolve the pending booking from the calendar side: confirm it, or
    /// fail it and release the claimed capacity.
    pub async fn resolve_booking(&self, flow_id: Uuid, confirmed: bool) -> Result<Flow, Error> {
        let store = self.engine.store();
        let flow = store
            .get_flow(flow_id)
            .await?
            .ok_or(FlowError::NotFound { id: flow_id })?;
        let booking_id = match (flow.status, flow.booking_id) {
            (FlowStatus::BookingPending, Some(id)) => id,
            _ => return Err(SchedulingError::NoPendingBooking { flow_id }.into()),
        };
        let booking = store
            .get_booking(booking_id)
            .await?
            .ok_or(SchedulingError::NoPendingBooking { flow_id })?;

        let payload = EventPayload::BookingResolved {
            booking_id,
            confirmed,
        };
        if confirmed {
            store
                .update_booking_status(booking_id, BookingStatus::Confirmed)
                .await?;
            let flow = self
                .engine
                .transition(flow_id, FlowStatus::BookingConfirmed, payload)
                .await?;
            Ok(flow)
        } else {
            store
                .update_booking_status(booking_id, BookingStatus::Cancelled)
                .await?;
            store.release_slot(booking.slot_id).await?;
            let flow = self
                .engine
                .transition(flow_id, FlowStatus::BookingFailed, payload)
                .await?;
            Ok(flow)
        }
    }

    async fn event_type_of(&self, flow: &Flow) -> Result<Option<EventType>, Error> {
        match flow.event_type_id {
            Some(id) => Ok(self.engine.store().get_event_type(id).await?),
            None => Ok(None),
        }
    }

    /// Curated mode: ask the oracle to pick 2–3 candidates from the open
    /// slots; fall back to the soonest slots when the oracle is unavailable.
    /// One scheduling-optimization session is recorded either way.
    async fn generate_curated(&self, flow: &Flow) -> Result<(), Error> {
        let store = self.engine.store();
        let Some(event_type) = self.event_type_of(flow).await? else {
            return Ok(());
        };

        let now = Utc::now();
        let open = store.list_open_slots(event_type.id, now).await?;
        let pool: Vec<&AvailabilitySlot> = slots::displayable(&open, &event_type, now)
            .into_iter()
            .take(CURATION_POOL)
            .collect();
        if pool.is_empty() {
            warn!(flow_id = %flow.id, "No open slots to curate");
            return Ok(());
        }

        let request = OracleRequest {
            kind: AnalysisKind::SchedulingOptimization,
            system_prompt: prompts::curation_system_prompt(CURATED_COUNT),
            user_prompt: prompts::curation_user_prompt(&pool, store.get_insight(flow.id).await?.as_ref()),
            input: serde_json::json!({ "candidates": pool.len() }),
        };

        let picked: Vec<Uuid> = match tokio::time::timeout(
            self.config.oracle_timeout,
            self.oracle.analyze(&request),
        )
        .await
        {
            Ok(Ok(response)) => {
                let session = AiAnalysisSession::succeeded(
                    flow.id,
                    AnalysisKind::SchedulingOptimization,
                    request.input.clone(),
                    response.raw.clone(),
                    response.verdict.clone(),
                    0,
                );
                store.record_analysis_session(&session).await?;
                let by_index: Vec<Uuid> = response
                    .verdict
                    .curated_slot_indexes
                    .iter()
                    .filter_map(|&i| pool.get(i).map(|s| s.id))
                    .take(CURATED_COUNT)
                    .collect();
                if by_index.is_empty() {
                    pool.iter().take(CURATED_COUNT).map(|s| s.id).collect()
                } else {
                    by_index
                }
            }
            other => {
                if let Ok(Err(e)) = other {
                    warn!(flow_id = %flow.id, error = %e, "Curation oracle failed; using soonest slots");
                } else {
                    warn!(flow_id = %flow.id, "Curation oracle timed out; using soonest slots");
                }
                let session = AiAnalysisSession::failed(
                    flow.id,
                    AnalysisKind::SchedulingOptimization,
                    request.input.clone(),
                    None,
                    0,
                );
                store.record_analysis_session(&session).await?;
                pool.iter().take(CURATED_COUNT).map(|s| s.id).collect()
            }
        };

        let mut recommendation = store
            .get_recommendation(flow.id)
            .await?
            .unwrap_or_else(|| {
                crate::analysis::SchedulingRecommendation::new(
                    flow.id,
                    event_type.duration_minutes,
                    crate::flow::status::PriorityLevel::Medium,
                )
            });
        recommendation.curated_slot_ids = picked.clone();
        recommendation.curated_slots_generated = true;
        recommendation.curated_sent_at = Some(now);
        recommendation.updated_at = now;
        store.upsert_recommendation(&recommendation).await?;

        self.engine
            .append_action(
                flow.id,
                FlowEventKind::CuratedSlotsGenerated,
                EventPayload::CuratedSlots {
                    slot_ids: picked.clone(),
                },
            )
            .await?;
        info!(flow_id = %flow.id, count = picked.len(), "Curated slots generated");
        Ok(())
    }
}
