//! Qualification gateway — spam gate, scoring rules, and the oracle call.
//!
//! Order per invocation: spam gate (no oracle budget) → disqualifying-choice
//! short-circuit (no oracle budget) → oracle scoring with bounded timeout and
//! jittered retries → verdict against the event type's minimum. Every oracle
//! attempt writes exactly one immutable analysis session; retry exhaustion
//! parks the flow for manual review instead of failing it.

pub mod oracle;
pub mod prompts;
pub mod scoring;
pub mod spam;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{
    AiAnalysisSession, AnalysisKind, ProspectInsight, SchedulingRecommendation,
};
use crate::config::EngineConfig;
use crate::error::{Error, FlowError, OracleError};
use crate::flow::event::{EventPayload, FlowEventKind};
use crate::flow::machine::FlowEngine;
use crate::flow::model::Flow;
use crate::flow::status::FlowStatus;
use crate::qualify::oracle::{OracleRequest, OracleResponse, OracleVerdict, ScoringOracle};
use crate::qualify::spam::SpamScorer;

/// Base delay for the retry backoff; doubled per attempt, plus jitter.
const RETRY_BASE: Duration = Duration::from_millis(500);

/// How one qualification run ended.
#[derive(Debug)]
pub enum QualificationOutcome {
    Qualified(Flow),
    Disqualified(Flow),
    SpamDetected(Flow),
    /// Oracle retries exhausted; parked for a reviewer.
    ManualReview(Flow),
    /// The flow left `qualifying` mid-call (reaped or raced); the oracle
    /// response was recorded but not applied.
    Discarded(Flow),
}

/// The qualification gateway.
pub struct QualificationGateway {
    engine: Arc<FlowEngine>,
    oracle: Arc<dyn ScoringOracle>,
    spam: SpamScorer,
    config: EngineConfig,
}

impl QualificationGateway {
    pub fn new(
        engine: Arc<FlowEngine>,
        oracle: Arc<dyn ScoringOracle>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine,
            oracle,
            spam: SpamScorer::default_rules(),
            config,
        }
    }

    /// Qualify a flow from its completed response.
    pub async fn qualify(&self, flow_id: Uuid) -> Result<QualificationOutcome, Error> {
        let store = self.engine.store();
        let flow = store
            .get_flow(flow_id)
            .await?
            .ok_or(FlowError::NotFound { id: flow_id })?;

        // Enter qualifying if we aren't there yet; re-entry (manual retry of a
        // parked flow) is allowed.
        let flow = match flow.status {
            FlowStatus::FormCompleted => {
                self.engine
                    .transition(flow_id, FlowStatus::Qualifying, EventPayload::None)
                    .await?
            }
            FlowStatus::Qualifying => flow,
            other => {
                return Err(FlowError::InvalidTransition {
                    id: flow_id,
                    from: other,
                    to: FlowStatus::Qualifying,
                }
                .into());
            }
        };

        let response_id = flow.response_id.ok_or(FlowError::PreconditionFailed {
            id: flow_id,
            target: FlowStatus::Qualifying,
            reason: "no response linked".into(),
        })?;
        let response = store
            .get_response(response_id)
            .await?
            .ok_or(FlowError::PreconditionFailed {
                id: flow_id,
                target: FlowStatus::Qualifying,
                reason: "linked response missing".into(),
            })?;
        let form = store
            .get_form(flow.form_id)
            .await?
            .ok_or(FlowError::PreconditionFailed {
                id: flow_id,
                target: FlowStatus::Qualifying,
                reason: "form missing".into(),
            })?;
        let event_type = match flow.event_type_id {
            Some(id) => store.get_event_type(id).await?,
            None => None,
        };

        // 1. Spam gate — cheap, no oracle budget.
        let spam = self.spam.score(&response);
        if spam.score >= self.config.spam_threshold {
            let score = spam.score;
            let flags = spam.flags.clone();
            let flow = self
                .engine
                .transition_with(
                    flow_id,
                    FlowStatus::SpamDetected,
                    EventPayload::Spam {
                        score,
                        flags: flags.clone(),
                    },
                    |f| {
                        f.spam_score = score;
                        f.spam_flags = flags;
                    },
                )
                .await?;
            info!(flow_id = %flow_id, score, "Response tripped the spam gate");
            return Ok(QualificationOutcome::SpamDetected(flow));
        }

        // 2. Disqualifying-choice short-circuit — no oracle budget.
        if let Some((_, choice)) = scoring::find_disqualifying(&response, &form) {
            let message = choice.disqualification_message.clone();
            let verdict = OracleVerdict::scored(0, 1.0)
                .with_reason(format!("disqualifying choice: {}", choice.label));
            let session = AiAnalysisSession::succeeded(
                flow_id,
                AnalysisKind::Qualification,
                serde_json::json!({ "short_circuit": "disqualifying_choice" }),
                String::new(),
                verdict,
                0,
            );
            store.record_analysis_session(&session).await?;

            let spam_score = spam.score;
            let spam_flags = spam.flags.clone();
            let flow = self
                .engine
                .transition_with(
                    flow_id,
                    FlowStatus::Disqualified,
                    EventPayload::Disqualified {
                        message: message.clone(),
                    },
                    |f| {
                        f.qualification_score = Some(0);
                        f.spam_score = spam_score;
                        f.spam_flags = spam_flags;
                    },
                )
                .await?;
            info!(flow_id = %flow_id, "Disqualifying choice short-circuit");
            return Ok(QualificationOutcome::Disqualified(flow));
        }

        // 3. Oracle scoring with timeout and retries.
        let request = OracleRequest {
            kind: AnalysisKind::Qualification,
            system_prompt: prompts::qualification_system_prompt(),
            user_prompt: prompts::qualification_user_prompt(&form, &response, event_type.as_ref()),
            input: serde_json::json!({
                "form_id": form.id,
                "response_id": response.id,
                "answer_count": response.answers.len(),
            }),
        };

        let oracle_response = match self.call_with_retries(flow_id, &request).await? {
            Some(response) => response,
            None => {
                // Retries exhausted: park for a reviewer, stay in qualifying.
                let flow = self
                    .engine
                    .update_with(flow_id, |f| f.needs_manual_review = true)
                    .await?;
                self.engine
                    .append_action(
                        flow_id,
                        FlowEventKind::ManualReviewRequested,
                        EventPayload::ManualReview {
                            reviewer: None,
                            qualified: None,
                        },
                    )
                    .await?;
                warn!(flow_id = %flow_id, "Oracle retries exhausted; parked for manual review");
                return Ok(QualificationOutcome::ManualReview(flow));
            }
        };

        // 4. Discard-on-abandon: if the flow left `qualifying` mid-call, the
        // verdict is dropped (the session row already exists for audit).
        let current = store
            .get_flow(flow_id)
            .await?
            .ok_or(FlowError::NotFound { id: flow_id })?;
        if current.status != FlowStatus::Qualifying {
            info!(flow_id = %flow_id, status = %current.status, "Flow moved mid-call; discarding oracle verdict");
            return Ok(QualificationOutcome::Discarded(current));
        }

        // 5. Verdict.
        let verdict = &oracle_response.verdict;
        let rule_score = scoring::weighted_score(&response, &form);
        let aggregate = scoring::blend(rule_score, verdict.score);
        let minimum = event_type.as_ref().and_then(|et| et.minimum_qualification_score);
        let passes = scoring::meets_minimum(aggregate, minimum);

        self.record_derived_outputs(flow_id, verdict).await?;

        let target = if passes {
            FlowStatus::Qualified
        } else {
            FlowStatus::Disqualified
        };
        let payload = EventPayload::Qualification {
            score: aggregate.unwrap_or(0),
            confidence: Some(verdict.confidence),
            reasons: verdict.reasons.clone(),
        };
        let spam_score = spam.score;
        let spam_flags = spam.flags.clone();
        let verdict_for_apply = verdict.clone();
        let flow = self
            .engine
            .transition_with(flow_id, target, payload, move |f| {
                f.qualification_score = aggregate;
                f.intent_score = verdict_for_apply.intent_score;
                f.priority_level = aggregate.map(crate::flow::status::PriorityLevel::from_score);
                f.prospect_summary = verdict_for_apply.summary.clone();
                f.spam_score = spam_score;
                f.spam_flags = spam_flags;
                f.needs_manual_review = false;
            })
            .await?;

        info!(
            flow_id = %flow_id,
            aggregate = ?aggregate,
            minimum = ?minimum,
            outcome = %target,
            "Qualification complete"
        );
        Ok(if passes {
            QualificationOutcome::Qualified(flow)
        } else {
            QualificationOutcome::Disqualified(flow)
        })
    }

    /// Resolve a parked manual-review flow with a human verdict.
    pub async fn resolve_manual_review(
        &self,
        flow_id: Uuid,
        reviewer: &str,
        qualified: bool,
    ) -> Result<Flow, Error> {
        let store = self.engine.store();
        let flow = store
            .get_flow(flow_id)
            .await?
            .ok_or(FlowError::NotFound { id: flow_id })?;
        if !flow.needs_manual_review || flow.status != FlowStatus::Qualifying {
            return Err(FlowError::PreconditionFailed {
                id: flow_id,
                target: FlowStatus::Qualified,
                reason: "flow is not awaiting manual review".into(),
            }
            .into());
        }

        let verdict = OracleVerdict::scored(if qualified { 100 } else { 0 }, 1.0)
            .with_reason(format!("manual verdict by {reviewer}"));
        let session = AiAnalysisSession::succeeded(
            flow_id,
            AnalysisKind::ManualReview,
            serde_json::json!({ "reviewer": reviewer }),
            String::new(),
            verdict,
            0,
        );
        store.record_analysis_session(&session).await?;

        let target = if qualified {
            FlowStatus::Qualified
        } else {
            FlowStatus::Disqualified
        };
        let flow = self
            .engine
            .transition_with(
                flow_id,
                target,
                EventPayload::ManualReview {
                    reviewer: Some(reviewer.to_string()),
                    qualified: Some(qualified),
                },
                |f| {
                    f.needs_manual_review = false;
                },
            )
            .await?;

        self.engine
            .append_action(
                flow_id,
                FlowEventKind::ManualReviewResolved,
                EventPayload::ManualReview {
                    reviewer: Some(reviewer.to_string()),
                    qualified: Some(qualified),
                },
            )
            .await?;
        info!(flow_id = %flow_id, reviewer, qualified, "Manual review resolved");
        Ok(flow)
    }

    /// Run the oracle up to the configured attempt cap, recording one session
    /// per attempt. Returns None when every attempt failed.
    async fn call_with_retries(
        &self,
        flow_id: Uuid,
        request: &OracleRequest,
    ) -> Result<Option<OracleResponse>, Error> {
        let store = self.engine.store();
        let attempts = self.config.oracle_max_retries.max(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = RETRY_BASE * 2u32.saturating_pow(attempt - 1);
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
                tokio::time::sleep(backoff + jitter).await;
            }

            let result =
                tokio::time::timeout(self.config.oracle_timeout, self.oracle.analyze(request))
                    .await;
            match result {
                Ok(Ok(response)) => {
                    let session = AiAnalysisSession::succeeded(
                        flow_id,
                        request.kind,
                        request.input.clone(),
                        response.raw.clone(),
                        response.verdict.clone(),
                        attempt,
                    );
                    store.record_analysis_session(&session).await?;
                    return Ok(Some(response));
                }
                Ok(Err(e)) => {
                    warn!(flow_id = %flow_id, attempt, error = %e, "Oracle attempt failed");
                    let session = AiAnalysisSession::failed(
                        flow_id,
                        request.kind,
                        request.input.clone(),
                        None,
                        attempt,
                    );
                    store.record_analysis_session(&session).await?;
                }
                Err(_) => {
                    let timeout = self.config.oracle_timeout;
                    warn!(
                        flow_id = %flow_id,
                        attempt,
                        error = %OracleError::Timeout { timeout },
                        "Oracle attempt timed out"
                    );
                    let session = AiAnalysisSession::failed(
                        flow_id,
                        request.kind,
                        request.input.clone(),
                        None,
                        attempt,
                    );
                    store.record_analysis_session(&session).await?;
                }
            }
        }
        Ok(None)
    }

    /// Upsert the insight and recommendation derived from a verdict.
    async fn record_derived_outputs(
        &self,
        flow_id: Uuid,
        verdict: &OracleVerdict,
    ) -> Result<(), Error> {
        let store = self.engine.store();

        if let Some(summary) = &verdict.summary {
            let mut insight = ProspectInsight::new(flow_id, summary.clone());
            insight.pain_points = verdict.pain_points.clone();
            insight.buying_signals = verdict.buying_signals.clone();
            insight.recommended_approach = verdict.recommended_approach.clone();
            store.upsert_insight(&insight).await?;
        }

        let urgency = verdict
            .score
            .map(crate::flow::status::PriorityLevel::from_score)
            .unwrap_or(crate::flow::status::PriorityLevel::Medium);
        let recommendation = SchedulingRecommendation::new(
            flow_id,
            verdict.recommended_duration_minutes.unwrap_or(30),
            urgency,
        );
        store.upsert_recommendation(&recommendation).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::flow::model::EventType;
    use crate::forms::{Answer, Choice, Form, FormResponse, Question};
    use crate::notify::NotificationBus;
    use crate::store::{FlowStore, LibSqlBackend};

    /// Oracle stub returning a fixed verdict.
    struct StubOracle {
        verdict: OracleVerdict,
        calls: AtomicU32,
    }

    impl StubOracle {
        fn scoring(score: u8) -> Self {
            Self {
                verdict: OracleVerdict::scored(score, 0.9).with_reason("stub"),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ScoringOracle for StubOracle {
        fn model_name(&self) -> &str {
            "stub"
        }
        async fn analyze(&self, _request: &OracleRequest) -> Result<OracleResponse, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(OracleResponse {
                raw: "{}".to_string(),
                verdict: self.verdict.clone(),
            })
        }
    }

    /// Oracle stub that never returns within the gateway timeout.
    struct HangingOracle;

    #[async_trait]
    impl ScoringOracle for HangingOracle {
        fn model_name(&self) -> &str {
            "hanging"
        }
        async fn analyze(&self, _request: &OracleRequest) -> Result<OracleResponse, OracleError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("the gateway timeout fires first")
        }
    }

    struct Fixture {
        engine: Arc<FlowEngine>,
        flow_id: Uuid,
    }

    /// Seed a form + completed response + flow sitting in `FormCompleted`.
    async fn seed(disqualifying: bool, event_type: Option<EventType>) -> Fixture {
        let store: Arc<dyn FlowStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let engine = Arc::new(FlowEngine::new(Arc::clone(&store), NotificationBus::new()));
        let organization_id = Uuid::new_v4();

        let budget = Question::single_choice(
            "Budget?",
            8,
            vec![
                Choice::new("Over $10k", 90),
                Choice::disqualifying("No budget", "We only work with funded teams."),
            ],
        );
        let picked = if disqualifying {
            budget.choices[1].id
        } else {
            budget.choices[0].id
        };
        let question_id = budget.id;
        let form = Form::new(organization_id, "Demo request", vec![budget]);
        store.insert_form(&form).await.unwrap();

        let event_type = match event_type {
            Some(mut et) => {
                et.organization_id = organization_id;
                store.insert_event_type(&et).await.unwrap();
                Some(et)
            }
            None => None,
        };

        let mut response = FormResponse::new(form.id, "ada@example.com");
        response.answers.push(Answer {
            question_id,
            choice_ids: vec![picked],
            text: Some("We need this rolled out before Q4.".into()),
        });
        response.completed = true;
        store.insert_response(&response).await.unwrap();

        let flow = engine
            .create_flow(organization_id, form.id, event_type.as_ref())
            .await
            .unwrap();
        let response_id = response.id;
        engine
            .transition_with(flow.id, FlowStatus::FormCompleted, EventPayload::None, |f| {
                f.response_id = Some(response_id);
                f.completion_percentage = 100;
            })
            .await
            .unwrap();

        Fixture {
            engine,
            flow_id: flow.id,
        }
    }

    fn gateway(fixture: &Fixture, oracle: Arc<dyn ScoringOracle>, config: EngineConfig) -> QualificationGateway {
        QualificationGateway::new(Arc::clone(&fixture.engine), oracle, config)
    }

    #[tokio::test]
    async fn oracle_verdict_qualifies_the_flow() {
        let fixture = seed(false, None).await;
        let gateway = gateway(&fixture, Arc::new(StubOracle::scoring(85)), EngineConfig::default());

        let outcome = gateway.qualify(fixture.flow_id).await.unwrap();
        let flow = match outcome {
            QualificationOutcome::Qualified(flow) => flow,
            other => panic!("expected qualified, got {other:?}"),
        };
        assert_eq!(flow.status, FlowStatus::Qualified);
        // 70% oracle (85) + 30% rules (90)
        assert_eq!(flow.qualification_score, Some(87));
        assert!(flow.qualification_completed_at.is_some());

        let sessions = fixture.engine.store().list_analysis_sessions(flow.id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].was_successful);
    }

    #[tokio::test]
    async fn minimum_score_disqualifies() {
        let event_type = EventType::new(
            Uuid::new_v4(),
            "Enterprise demo",
            crate::flow::status::SchedulingMode::Instant,
        )
        .with_minimum_score(95);
        let fixture = seed(false, Some(event_type)).await;
        let gateway = gateway(&fixture, Arc::new(StubOracle::scoring(60)), EngineConfig::default());

        let outcome = gateway.qualify(fixture.flow_id).await.unwrap();
        assert!(matches!(outcome, QualificationOutcome::Disqualified(_)));
    }

    /// A disqualifying choice ends qualification with one session and no
    /// oracle call.
    #[tokio::test]
    async fn disqualifying_choice_short_circuits() {
        let fixture = seed(true, None).await;
        let oracle = Arc::new(StubOracle::scoring(99));
        let gateway = gateway(&fixture, Arc::clone(&oracle) as Arc<dyn ScoringOracle>, EngineConfig::default());

        let outcome = gateway.qualify(fixture.flow_id).await.unwrap();
        let flow = match outcome {
            QualificationOutcome::Disqualified(flow) => flow,
            other => panic!("expected disqualified, got {other:?}"),
        };
        assert_eq!(flow.status, FlowStatus::Disqualified);
        assert_eq!(flow.qualification_score, Some(0));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);

        let sessions = fixture.engine.store().list_analysis_sessions(flow.id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].was_successful);
    }

    #[tokio::test]
    async fn spam_gate_blocks_before_the_oracle() {
        let store: Arc<dyn FlowStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let engine = Arc::new(FlowEngine::new(Arc::clone(&store), NotificationBus::new()));
        let organization_id = Uuid::new_v4();

        let form = Form::new(organization_id, "t", vec![Question::free_text("notes", 1)]);
        store.insert_form(&form).await.unwrap();
        let mut response = FormResponse::new(form.id, "bot@mailinator.com");
        response.answers.push(Answer {
            question_id: form.questions[0].id,
            choice_ids: Vec::new(),
            text: Some("cheap backlinks http://a.com http://b.com http://c.com".into()),
        });
        store.insert_response(&response).await.unwrap();

        let flow = engine.create_flow(organization_id, form.id, None).await.unwrap();
        let response_id = response.id;
        engine
            .transition_with(flow.id, FlowStatus::FormCompleted, EventPayload::None, |f| {
                f.response_id = Some(response_id)
            })
            .await
            .unwrap();

        let oracle = Arc::new(StubOracle::scoring(99));
        let gateway = QualificationGateway::new(
            Arc::clone(&engine),
            Arc::clone(&oracle) as Arc<dyn ScoringOracle>,
            EngineConfig::default(),
        );

        let outcome = gateway.qualify(flow.id).await.unwrap();
        let flow = match outcome {
            QualificationOutcome::SpamDetected(flow) => flow,
            other => panic!("expected spam, got {other:?}"),
        };
        assert_eq!(flow.status, FlowStatus::SpamDetected);
        assert!(flow.spam_score >= 70);
        assert!(!flow.spam_flags.is_empty());
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    /// Three timeouts route the flow to manual review, with one failed session
    /// per attempt; a reviewer verdict then finishes qualification.
    #[tokio::test]
    async fn timeout_exhaustion_parks_for_manual_review() {
        let fixture = seed(false, None).await;
        let config = EngineConfig {
            oracle_timeout: Duration::from_millis(20),
            oracle_max_retries: 3,
            ..EngineConfig::default()
        };
        let gateway = gateway(&fixture, Arc::new(HangingOracle), config);

        let outcome = gateway.qualify(fixture.flow_id).await.unwrap();
        let flow = match outcome {
            QualificationOutcome::ManualReview(flow) => flow,
            other => panic!("expected manual review, got {other:?}"),
        };
        assert_eq!(flow.status, FlowStatus::Qualifying);
        assert!(flow.needs_manual_review);

        let sessions = fixture.engine.store().list_analysis_sessions(flow.id).await.unwrap();
        assert_eq!(sessions.len(), 3);
        assert!(sessions.iter().all(|s| !s.was_successful));
        assert_eq!(sessions[2].retry_count, 2);

        let queue = fixture.engine.store().list_review_queue().await.unwrap();
        assert_eq!(queue.len(), 1);

        let resolved = gateway
            .resolve_manual_review(flow.id, "ops@tenant.example", true)
            .await
            .unwrap();
        assert_eq!(resolved.status, FlowStatus::Qualified);
        assert!(!resolved.needs_manual_review);
    }

    #[tokio::test]
    async fn manual_review_rejects_flows_not_parked() {
        let fixture = seed(false, None).await;
        let gateway = gateway(&fixture, Arc::new(StubOracle::scoring(80)), EngineConfig::default());
        let err = gateway
            .resolve_manual_review(fixture.flow_id, "ops", true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Flow(FlowError::PreconditionFailed { .. })
        ));
    }
}
