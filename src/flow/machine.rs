//! Flow transition engine.
//!
//! Single entry point for every status change. Validates the edge, checks
//! preconditions, stamps lifecycle timestamps, commits with a version check,
//! appends exactly one ledger event, and publishes the notification — in that
//! order. A failed commit leaves the row untouched and surfaces a concurrency
//! error the caller resolves by re-reading and retrying.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::AnalysisKind;
use crate::error::{Error, FlowError};
use crate::flow::event::{EventPayload, FlowEvent, FlowEventKind};
use crate::flow::model::{EventType, Flow};
use crate::flow::status::FlowStatus;
use crate::notify::{FlowNotification, NotificationBus};
use crate::store::FlowStore;

/// Attempts for self-inflicted races in `touch` (interaction pings).
const TOUCH_ATTEMPTS: u32 = 3;

/// The flow state machine.
pub struct FlowEngine {
    store: Arc<dyn FlowStore>,
    bus: NotificationBus,
}

impl FlowEngine {
    pub fn new(store: Arc<dyn FlowStore>, bus: NotificationBus) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &Arc<dyn FlowStore> {
        &self.store
    }

    /// Create a flow in `FormStarted` for a form/event-type pair.
    pub async fn create_flow(
        &self,
        organization_id: Uuid,
        form_id: Uuid,
        event_type: Option<&EventType>,
    ) -> Result<Flow, Error> {
        let mode = event_type.map(|et| et.scheduling_mode).unwrap_or_default();
        let mut flow = Flow::new(organization_id, form_id, event_type.map(|et| et.id), mode);
        flow.event_type_id = event_type.map(|et| et.id);
        self.store.insert_flow(&flow).await?;
        self.bump_counter(organization_id, "flows_started").await;
        info!(flow_id = %flow.id, form_id = %form_id, mode = %mode, "Flow created");
        Ok(flow)
    }

    /// Transition a flow to `target`, applying no extra mutation.
    pub async fn transition(
        &self,
        flow_id: Uuid,
        target: FlowStatus,
        payload: EventPayload,
    ) -> Result<Flow, Error> {
        self.transition_with(flow_id, target, payload, |_| {}).await
    }

    /// Transition a flow to `target`, applying `mutate` to the row inside the
    /// same commit (scores, links, flags that belong to the transition).
    pub async fn transition_with<F>(
        &self,
        flow_id: Uuid,
        target: FlowStatus,
        payload: EventPayload,
        mutate: F,
    ) -> Result<Flow, Error>
    where
        F: FnOnce(&mut Flow),
    {
        let flow = self.load(flow_id).await?;
        self.check_edge(&flow, target)?;
        self.check_preconditions(&flow, target).await?;

        let now = Utc::now();
        let mut updated = flow.clone();
        mutate(&mut updated);
        updated.status = target;
        updated.stamp_entry(target, now);
        updated.last_active_at = now;

        if !self.store.update_flow(&updated, flow.version).await? {
            debug!(flow_id = %flow_id, expected = flow.version, "Transition lost version race");
            return Err(FlowError::ConcurrentModification {
                id: flow_id,
                expected: flow.version,
            }
            .into());
        }
        updated.version = flow.version + 1;

        let event = FlowEvent::transition(flow_id, flow.status, target, payload.clone());
        self.store.append_event(&event).await?;

        if let Some(counter) = counter_for(target) {
            self.bump_counter(updated.organization_id, counter).await;
        }

        self.publish(&updated, flow.status, &payload).await;
        info!(flow_id = %flow_id, from = %flow.status, to = %target, "Flow transitioned");
        Ok(updated)
    }

    /// Explicit recovery action: reopen an abandoned flow back to
    /// `FormCompleted`, clearing the abandonment mark.
    ///
    /// Not a normal transition — it is the single sanctioned exit from a
    /// terminal state, and it refuses every terminal state but `Abandoned`.
    pub async fn reopen(&self, flow_id: Uuid) -> Result<Flow, Error> {
        let flow = self.load(flow_id).await?;
        if flow.status != FlowStatus::Abandoned {
            return Err(FlowError::NotReopenable {
                id: flow_id,
                status: flow.status,
            }
            .into());
        }

        let now = Utc::now();
        let mut updated = flow.clone();
        updated.status = FlowStatus::FormCompleted;
        updated.abandoned_at = None;
        updated.last_active_at = now;

        if !self.store.update_flow(&updated, flow.version).await? {
            return Err(FlowError::ConcurrentModification {
                id: flow_id,
                expected: flow.version,
            }
            .into());
        }
        updated.version = flow.version + 1;

        let event = FlowEvent::action(
            flow_id,
            FlowEventKind::Reopened,
            FlowStatus::Abandoned,
            FlowStatus::FormCompleted,
            EventPayload::None,
        );
        self.store.append_event(&event).await?;
        self.bump_counter(updated.organization_id, "flows_reopened").await;
        self.publish(&updated, FlowStatus::Abandoned, &EventPayload::None).await;

        info!(flow_id = %flow_id, "Abandoned flow reopened");
        Ok(updated)
    }

    /// Record a non-transition action event (approval, curated send, manual
    /// review markers). Status is unchanged; `last_active_at` still moves.
    pub async fn append_action(
        &self,
        flow_id: Uuid,
        kind: FlowEventKind,
        payload: EventPayload,
    ) -> Result<(), Error> {
        let flow = self.load(flow_id).await?;
        let event = FlowEvent::action(flow_id, kind, flow.status, flow.status, payload);
        self.store.append_event(&event).await?;
        self.touch(flow_id).await?;
        Ok(())
    }

    /// Version-checked mutation that is not a status change (approval marks,
    /// manual-review flags, progress updates). Bumps `last_active_at`, appends
    /// no event.
    pub async fn update_with<F>(&self, flow_id: Uuid, mutate: F) -> Result<Flow, Error>
    where
        F: FnOnce(&mut Flow),
    {
        let flow = self.load(flow_id).await?;
        let mut updated = flow.clone();
        mutate(&mut updated);
        updated.status = flow.status;
        updated.last_active_at = Utc::now();

        if !self.store.update_flow(&updated, flow.version).await? {
            return Err(FlowError::ConcurrentModification {
                id: flow_id,
                expected: flow.version,
            }
            .into());
        }
        updated.version = flow.version + 1;
        Ok(updated)
    }

    /// Refresh `last_active_at` on respondent interaction.
    ///
    /// Retries its own version races: a touch carries no other mutation, so
    /// replaying it against a fresh read is always safe.
    pub async fn touch(&self, flow_id: Uuid) -> Result<(), Error> {
        for _ in 0..TOUCH_ATTEMPTS {
            let flow = self.load(flow_id).await?;
            let mut updated = flow.clone();
            updated.last_active_at = Utc::now();
            if self.store.update_flow(&updated, flow.version).await? {
                return Ok(());
            }
        }
        warn!(flow_id = %flow_id, "touch kept losing version races; giving up");
        Ok(())
    }

    async fn load(&self, flow_id: Uuid) -> Result<Flow, Error> {
        self.store
            .get_flow(flow_id)
            .await?
            .ok_or_else(|| FlowError::NotFound { id: flow_id }.into())
    }

    fn check_edge(&self, flow: &Flow, target: FlowStatus) -> Result<(), FlowError> {
        if flow.status.is_terminal() {
            return Err(FlowError::FlowTerminated {
                id: flow.id,
                status: flow.status,
            });
        }
        if !flow.status.can_transition_to(target) {
            return Err(FlowError::InvalidTransition {
                id: flow.id,
                from: flow.status,
                to: target,
            });
        }
        Ok(())
    }

    async fn check_preconditions(&self, flow: &Flow, target: FlowStatus) -> Result<(), Error> {
        match target {
            FlowStatus::Qualifying => {
                if flow.form_completed_at.is_none() {
                    return Err(FlowError::PreconditionFailed {
                        id: flow.id,
                        target,
                        reason: "form_completed_at not set".into(),
                    }
                    .into());
                }
            }
            FlowStatus::Qualified | FlowStatus::Disqualified => {
                let scored = self
                    .store
                    .has_completed_session(flow.id, AnalysisKind::Qualification)
                    .await?
                    || self
                        .store
                        .has_completed_session(flow.id, AnalysisKind::ManualReview)
                        .await?;
                if !scored {
                    return Err(FlowError::PreconditionFailed {
                        id: flow.id,
                        target,
                        reason: "no completed qualification analysis".into(),
                    }
                    .into());
                }
            }
            FlowStatus::BookingConfirmed => {
                if flow.booking_id.is_none() {
                    return Err(FlowError::PreconditionFailed {
                        id: flow.id,
                        target,
                        reason: "no booking linked".into(),
                    }
                    .into());
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Counter updates are best-effort: a failed increment is logged and never
    /// rolls back the committed transition.
    async fn bump_counter(&self, organization_id: Uuid, name: &str) {
        if let Err(e) = self.store.increment_counter(organization_id, name).await {
            warn!(counter = name, error = %e, "Counter increment failed");
        }
    }

    async fn publish(&self, flow: &Flow, previous: FlowStatus, payload: &EventPayload) {
        // The recovery sink needs the respondent address; look it up only when
        // a flow just abandoned.
        let respondent_email = if flow.status == FlowStatus::Abandoned {
            match flow.response_id {
                Some(response_id) => self
                    .store
                    .get_response(response_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|r| r.respondent_email),
                None => None,
            }
        } else {
            None
        };

        self.bus.publish(FlowNotification {
            flow_id: flow.id,
            organization_id: flow.organization_id,
            previous_status: previous,
            new_status: flow.status,
            respondent_email,
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        });
    }
}

fn counter_for(status: FlowStatus) -> Option<&'static str> {
    match status {
        FlowStatus::Qualified => Some("flows_qualified"),
        FlowStatus::Disqualified => Some("flows_disqualified"),
        FlowStatus::SpamDetected => Some("flows_spam_detected"),
        FlowStatus::BookingConfirmed => Some("bookings_confirmed"),
        FlowStatus::BookingFailed => Some("bookings_failed"),
        FlowStatus::Abandoned => Some("flows_abandoned"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AiAnalysisSession;
    use crate::flow::status::SchedulingMode;
    use crate::qualify::oracle::OracleVerdict;
    use crate::store::LibSqlBackend;

    async fn engine() -> FlowEngine {
        let store: Arc<dyn FlowStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        FlowEngine::new(store, NotificationBus::new())
    }

    async fn started_flow(engine: &FlowEngine) -> Flow {
        engine
            .create_flow(Uuid::new_v4(), Uuid::new_v4(), None)
            .await
            .unwrap()
    }

    /// Record a successful qualification session so the qualified/disqualified
    /// precondition holds.
    async fn record_qualification(engine: &FlowEngine, flow_id: Uuid) {
        let verdict = OracleVerdict::scored(80, 0.9).with_reason("test");
        let session = AiAnalysisSession::succeeded(
            flow_id,
            AnalysisKind::Qualification,
            serde_json::json!({}),
            "{}".into(),
            verdict,
            0,
        );
        engine.store().record_analysis_session(&session).await.unwrap();
    }

    #[tokio::test]
    async fn happy_path_walks_every_edge() {
        let engine = engine().await;
        let flow = started_flow(&engine).await;

        let flow = engine
            .transition(flow.id, FlowStatus::FormCompleted, EventPayload::None)
            .await
            .unwrap();
        assert!(flow.form_completed_at.is_some());

        let flow = engine
            .transition(flow.id, FlowStatus::Qualifying, EventPayload::None)
            .await
            .unwrap();

        record_qualification(&engine, flow.id).await;
        let flow = engine
            .transition(flow.id, FlowStatus::Qualified, EventPayload::None)
            .await
            .unwrap();
        assert!(flow.qualification_completed_at.is_some());

        let flow = engine
            .transition(flow.id, FlowStatus::SchedulingOptions, EventPayload::None)
            .await
            .unwrap();
        let flow = engine
            .transition(flow.id, FlowStatus::BookingPending, EventPayload::None)
            .await
            .unwrap();

        let booking_id = Uuid::new_v4();
        let flow = engine
            .transition_with(flow.id, FlowStatus::BookingConfirmed, EventPayload::None, |f| {
                f.booking_id = Some(booking_id)
            })
            .await
            .unwrap();
        assert_eq!(flow.status, FlowStatus::BookingConfirmed);
        assert!(flow.booking_completed_at.is_some());

        let events = engine.store().list_events(flow.id).await.unwrap();
        assert_eq!(events.len(), 6);
        for window in events.windows(2) {
            assert_eq!(window[0].new_status, window[1].previous_status);
        }
    }

    #[tokio::test]
    async fn illegal_edge_is_rejected_and_flow_unchanged() {
        let engine = engine().await;
        let flow = started_flow(&engine).await;

        let err = engine
            .transition(flow.id, FlowStatus::Qualified, EventPayload::None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Flow(FlowError::InvalidTransition {
                from: FlowStatus::FormStarted,
                to: FlowStatus::Qualified,
                ..
            })
        ));

        let loaded = engine.store().get_flow(flow.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, FlowStatus::FormStarted);
        assert_eq!(loaded.version, 0);
        assert!(engine.store().list_events(flow.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn terminal_states_absorb() {
        let engine = engine().await;
        let flow = started_flow(&engine).await;
        engine
            .transition(flow.id, FlowStatus::Abandoned, EventPayload::None)
            .await
            .unwrap();

        let err = engine
            .transition(flow.id, FlowStatus::FormCompleted, EventPayload::None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Flow(FlowError::FlowTerminated { .. })));
    }

    #[tokio::test]
    async fn qualifying_requires_completed_form() {
        let engine = engine().await;
        let flow = started_flow(&engine).await;

        // Force the edge without the timestamp: FormCompleted entered via a
        // raw store write that skips stamping.
        let mut raw = engine.store().get_flow(flow.id).await.unwrap().unwrap();
        raw.status = FlowStatus::FormCompleted;
        assert!(engine.store().update_flow(&raw, 0).await.unwrap());

        let err = engine
            .transition(flow.id, FlowStatus::Qualifying, EventPayload::None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Flow(FlowError::PreconditionFailed { target: FlowStatus::Qualifying, .. })
        ));
    }

    #[tokio::test]
    async fn qualified_requires_a_completed_analysis() {
        let engine = engine().await;
        let flow = started_flow(&engine).await;
        engine
            .transition(flow.id, FlowStatus::FormCompleted, EventPayload::None)
            .await
            .unwrap();
        engine
            .transition(flow.id, FlowStatus::Qualifying, EventPayload::None)
            .await
            .unwrap();

        let err = engine
            .transition(flow.id, FlowStatus::Qualified, EventPayload::None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Flow(FlowError::PreconditionFailed { target: FlowStatus::Qualified, .. })
        ));
    }

    #[tokio::test]
    async fn booking_confirmed_requires_booking_link() {
        let engine = engine().await;
        let flow = started_flow(&engine).await;
        engine
            .transition(flow.id, FlowStatus::FormCompleted, EventPayload::None)
            .await
            .unwrap();
        engine
            .transition(flow.id, FlowStatus::Qualifying, EventPayload::None)
            .await
            .unwrap();
        record_qualification(&engine, flow.id).await;
        engine
            .transition(flow.id, FlowStatus::Qualified, EventPayload::None)
            .await
            .unwrap();
        engine
            .transition(flow.id, FlowStatus::SchedulingOptions, EventPayload::None)
            .await
            .unwrap();
        engine
            .transition(flow.id, FlowStatus::BookingPending, EventPayload::None)
            .await
            .unwrap();

        let err = engine
            .transition(flow.id, FlowStatus::BookingConfirmed, EventPayload::None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Flow(FlowError::PreconditionFailed { target: FlowStatus::BookingConfirmed, .. })
        ));
    }

    /// Two simultaneous requests for the same transition: exactly one commits.
    /// The loser sees either the version race or the now-current state.
    #[tokio::test]
    async fn racing_transitions_produce_exactly_one_winner() {
        let engine = Arc::new(engine().await);
        let flow = started_flow(&engine).await;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let id = flow.id;
                tokio::spawn(async move {
                    engine
                        .transition(id, FlowStatus::FormCompleted, EventPayload::None)
                        .await
                })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(Error::Flow(
                    FlowError::ConcurrentModification { .. } | FlowError::InvalidTransition { .. },
                )) => {}
                Err(other) => panic!("unexpected race outcome: {other}"),
            }
        }
        assert_eq!(wins, 1);

        let events = engine.store().list_events(flow.id).await.unwrap();
        assert_eq!(events.len(), 1);
        let loaded = engine.store().get_flow(flow.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, FlowStatus::FormCompleted);
        assert_eq!(loaded.version, 1);
    }

    #[tokio::test]
    async fn reopen_only_from_abandoned() {
        let engine = engine().await;
        let flow = started_flow(&engine).await;

        let err = engine.reopen(flow.id).await.unwrap_err();
        assert!(matches!(err, Error::Flow(FlowError::NotReopenable { .. })));

        engine
            .transition(flow.id, FlowStatus::Abandoned, EventPayload::None)
            .await
            .unwrap();
        let reopened = engine.reopen(flow.id).await.unwrap();
        assert_eq!(reopened.status, FlowStatus::FormCompleted);
        assert!(reopened.abandoned_at.is_none());

        let events = engine.store().list_events(flow.id).await.unwrap();
        assert_eq!(events.last().unwrap().kind, FlowEventKind::Reopened);
    }

    #[tokio::test]
    async fn terminal_transition_still_bumps_last_active() {
        let engine = engine().await;
        let flow = started_flow(&engine).await;
        let before = flow.last_active_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let abandoned = engine
            .transition(flow.id, FlowStatus::Abandoned, EventPayload::None)
            .await
            .unwrap();
        assert!(abandoned.last_active_at > before);
    }
}
