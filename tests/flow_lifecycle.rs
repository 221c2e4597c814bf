//! Integration tests for the flow engine behind the real HTTP + WS surface.
//!
//! Each test spins up an axum server on a random port with an in-memory
//! store and a stub oracle, then exercises the REST / WS contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use schedform::analysis::AnalysisKind;
use schedform::api::flow_routes;
use schedform::config::{EngineConfig, ReaperConfig};
use schedform::error::OracleError;
use schedform::flow::machine::FlowEngine;
use schedform::flow::status::{FlowStatus, SchedulingMode};
use schedform::flow::{EventPayload, EventType};
use schedform::forms::{Choice, Form, Question};
use schedform::notify::NotificationBus;
use schedform::qualify::QualificationGateway;
use schedform::qualify::oracle::{
    OracleRequest, OracleResponse, OracleVerdict, ScoringOracle,
};
use schedform::reaper::AbandonmentReaper;
use schedform::scheduling::{AvailabilitySlot, SchedulingDispatcher};
use schedform::store::{FlowStore, LibSqlBackend};

/// Maximum time any wait inside a test is allowed to block.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Stub oracle for integration tests (no real API calls).
struct StubOracle {
    score: u8,
}

#[async_trait]
impl ScoringOracle for StubOracle {
    fn model_name(&self) -> &str {
        "stub"
    }
    async fn analyze(&self, _request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        let mut verdict = OracleVerdict::scored(self.score, 0.9).with_reason("stub verdict");
        verdict.summary = Some("Mid-market team with budget".to_string());
        verdict.intent_score = Some(75);
        Ok(OracleResponse {
            raw: "{}".to_string(),
            verdict,
        })
    }
}

struct TestServer {
    base: String,
    store: Arc<dyn FlowStore>,
    engine: Arc<FlowEngine>,
    port: u16,
}

/// Start an axum server on a random port.
async fn start_server(oracle_score: u8) -> TestServer {
    let store: Arc<dyn FlowStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let bus = NotificationBus::new();
    let engine = Arc::new(FlowEngine::new(Arc::clone(&store), bus.clone()));
    let oracle: Arc<dyn ScoringOracle> = Arc::new(StubOracle { score: oracle_score });
    let config = EngineConfig::default();
    let gateway = Arc::new(QualificationGateway::new(
        Arc::clone(&engine),
        Arc::clone(&oracle),
        config.clone(),
    ));
    let dispatcher = Arc::new(SchedulingDispatcher::new(
        Arc::clone(&engine),
        oracle,
        config,
    ));
    let app = flow_routes(Arc::clone(&engine), gateway, dispatcher, bus);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        store,
        engine,
        port,
    }
}

struct Seeded {
    form: Form,
    event_type: EventType,
    slots: Vec<AvailabilitySlot>,
    disqualifying_choice: Uuid,
    scored_choice: Uuid,
    question_id: Uuid,
}

/// Seed a form with one scored and one disqualifying choice, an instant-mode
/// event type, and two open slots.
async fn seed(server: &TestServer, mode: SchedulingMode, slot_capacity: u32) -> Seeded {
    let organization_id = Uuid::new_v4();
    let budget = Question::single_choice(
        "Budget?",
        8,
        vec![
            Choice::new("Over $10k", 90),
            Choice::disqualifying("No budget", "We only work with funded teams."),
        ],
    );
    let question_id = budget.id;
    let scored_choice = budget.choices[0].id;
    let disqualifying_choice = budget.choices[1].id;
    let form = Form::new(organization_id, "Demo request", vec![budget]);
    server.store.insert_form(&form).await.unwrap();

    let event_type = EventType::new(organization_id, "Demo", mode).with_buffer_minutes(0);
    server.store.insert_event_type(&event_type).await.unwrap();

    let mut slots = Vec::new();
    for i in 0..2 {
        let starts = chrono::Utc::now() + chrono::Duration::hours(2 + i);
        let slot = AvailabilitySlot::new(
            event_type.id,
            starts,
            starts + chrono::Duration::minutes(30),
            slot_capacity,
        );
        server.store.insert_slot(&slot).await.unwrap();
        slots.push(slot);
    }

    Seeded {
        form,
        event_type,
        slots,
        disqualifying_choice,
        scored_choice,
        question_id,
    }
}

async fn post(client: &reqwest::Client, url: &str, body: Value) -> (u16, Value) {
    let resp = client.post(url).json(&body).send().await.unwrap();
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.unwrap_or_default();
    (status, body)
}

async fn get(client: &reqwest::Client, url: &str) -> (u16, Value) {
    let resp = client.get(url).send().await.unwrap();
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.unwrap_or_default();
    (status, body)
}

/// Start a flow and complete the form with the given choice.
async fn start_and_complete(
    client: &reqwest::Client,
    server: &TestServer,
    seeded: &Seeded,
    choice_id: Uuid,
) -> Uuid {
    let (status, flow) = post(
        client,
        &format!("{}/api/flows", server.base),
        serde_json::json!({
            "form_id": seeded.form.id,
            "event_type_id": seeded.event_type.id,
        }),
    )
    .await;
    assert_eq!(status, 200);
    let flow_id: Uuid = flow["id"].as_str().unwrap().parse().unwrap();

    let (status, _) = post(
        client,
        &format!("{}/api/flows/{flow_id}/complete", server.base),
        serde_json::json!({
            "respondent_email": "ada@example.com",
            "respondent_name": "Ada",
            "answers": [{
                "question_id": seeded.question_id,
                "choice_ids": [choice_id],
                "text": "We want to start next quarter."
            }],
        }),
    )
    .await;
    assert_eq!(status, 200);
    flow_id
}

#[tokio::test]
async fn full_lifecycle_start_to_confirmed_booking() {
    let server = start_server(85).await;
    let seeded = seed(&server, SchedulingMode::Instant, 1).await;
    let client = reqwest::Client::new();

    let flow_id = start_and_complete(&client, &server, &seeded, seeded.scored_choice).await;

    let (status, body) = post(
        &client,
        &format!("{}/api/flows/{flow_id}/qualify", server.base),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["outcome"], "qualified");

    let (status, _) = post(
        &client,
        &format!("{}/api/flows/{flow_id}/scheduling", server.base),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, 200);

    let (status, slots) = get(
        &client,
        &format!("{}/api/flows/{flow_id}/slots", server.base),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(slots.as_array().unwrap().len(), 2);

    let slot_id = slots[0]["id"].as_str().unwrap();
    let (status, body) = post(
        &client,
        &format!("{}/api/flows/{flow_id}/book", server.base),
        serde_json::json!({ "slot_id": slot_id }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["flow"]["status"], "booking_pending");

    let (status, flow) = post(
        &client,
        &format!("{}/api/flows/{flow_id}/resolve-booking", server.base),
        serde_json::json!({ "confirmed": true }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(flow["status"], "booking_confirmed");

    // The ledger holds the full journey; every link in the chain matches.
    let (status, events) = get(
        &client,
        &format!("{}/api/flows/{flow_id}/events", server.base),
    )
    .await;
    assert_eq!(status, 200);
    let events = events.as_array().unwrap().clone();
    assert!(events.len() >= 6);
    let transitions: Vec<&Value> = events
        .iter()
        .filter(|e| e["kind"] == "status_changed")
        .collect();
    for window in transitions.windows(2) {
        assert_eq!(window[0]["new_status"], window[1]["previous_status"]);
    }
    assert_eq!(
        transitions.last().unwrap()["new_status"],
        "booking_confirmed"
    );
}

/// Spec scenario: a disqualifying answer ends the flow with one analysis
/// session and no slot exposure.
#[tokio::test]
async fn disqualifying_answer_ends_the_journey() {
    let server = start_server(99).await;
    let seeded = seed(&server, SchedulingMode::Instant, 1).await;
    let client = reqwest::Client::new();

    let flow_id =
        start_and_complete(&client, &server, &seeded, seeded.disqualifying_choice).await;

    let (status, body) = post(
        &client,
        &format!("{}/api/flows/{flow_id}/qualify", server.base),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["outcome"], "disqualified");

    let sessions = server.store.list_analysis_sessions(flow_id).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].kind, AnalysisKind::Qualification);

    // Terminal flow: no slots, and scheduling is refused.
    let (_, slots) = get(
        &client,
        &format!("{}/api/flows/{flow_id}/slots", server.base),
    )
    .await;
    assert!(slots.as_array().unwrap().is_empty());
    let (status, _) = post(
        &client,
        &format!("{}/api/flows/{flow_id}/scheduling", server.base),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, 409);
}

/// Spec scenario: a slot at capacity returns SlotUnavailable and leaves the
/// flow unchanged.
#[tokio::test]
async fn capacity_miss_is_conflict_and_flow_survives() {
    let server = start_server(85).await;
    let seeded = seed(&server, SchedulingMode::Instant, 1).await;
    let client = reqwest::Client::new();

    let winner = start_and_complete(&client, &server, &seeded, seeded.scored_choice).await;
    let loser = start_and_complete(&client, &server, &seeded, seeded.scored_choice).await;

    for flow_id in [winner, loser] {
        post(
            &client,
            &format!("{}/api/flows/{flow_id}/qualify", server.base),
            serde_json::json!({}),
        )
        .await;
        post(
            &client,
            &format!("{}/api/flows/{flow_id}/scheduling", server.base),
            serde_json::json!({}),
        )
        .await;
    }

    let slot_id = seeded.slots[0].id;
    let (status, _) = post(
        &client,
        &format!("{}/api/flows/{winner}/book", server.base),
        serde_json::json!({ "slot_id": slot_id }),
    )
    .await;
    assert_eq!(status, 200);

    let (status, body) = post(
        &client,
        &format!("{}/api/flows/{loser}/book", server.base),
        serde_json::json!({ "slot_id": slot_id }),
    )
    .await;
    assert_eq!(status, 409);
    assert!(body["error"].as_str().unwrap().contains("capacity"));

    let (_, flow) = get(&client, &format!("{}/api/flows/{loser}", server.base)).await;
    assert_eq!(flow["status"], "scheduling_options");
}

/// Spec scenario: an approval-mode flow left unapproved past its threshold is
/// reaped, then reopened by the explicit recovery action.
#[tokio::test]
async fn unapproved_flow_is_reaped_then_reopened() {
    let server = start_server(85).await;
    let seeded = seed(&server, SchedulingMode::Approval, 1).await;
    let client = reqwest::Client::new();

    let flow_id = start_and_complete(&client, &server, &seeded, seeded.scored_choice).await;
    post(
        &client,
        &format!("{}/api/flows/{flow_id}/qualify", server.base),
        serde_json::json!({}),
    )
    .await;
    post(
        &client,
        &format!("{}/api/flows/{flow_id}/scheduling", server.base),
        serde_json::json!({}),
    )
    .await;

    // Booking before approval is refused.
    let (status, _) = post(
        &client,
        &format!("{}/api/flows/{flow_id}/book", server.base),
        serde_json::json!({ "slot_id": seeded.slots[0].id }),
    )
    .await;
    assert_eq!(status, 409);

    // 25 hours pass with no approval.
    let flow = server.store.get_flow(flow_id).await.unwrap().unwrap();
    let mut stale = flow.clone();
    stale.last_active_at = chrono::Utc::now() - chrono::Duration::hours(25);
    assert!(server.store.update_flow(&stale, flow.version).await.unwrap());

    let reaper = AbandonmentReaper::new(Arc::clone(&server.engine), ReaperConfig::default());
    assert_eq!(reaper.sweep().await.unwrap().reaped, 1);

    let (_, flow) = get(&client, &format!("{}/api/flows/{flow_id}", server.base)).await;
    assert_eq!(flow["status"], "abandoned");

    // Recovery action brings it back to form_completed; a second reopen is a
    // conflict.
    let (status, flow) = post(
        &client,
        &format!("{}/api/flows/{flow_id}/reopen", server.base),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(flow["status"], "form_completed");
    assert!(flow["abandoned_at"].is_null());

    let (status, _) = post(
        &client,
        &format!("{}/api/flows/{flow_id}/reopen", server.base),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn ws_stream_reports_transitions() {
    let server = start_server(85).await;
    let seeded = seed(&server, SchedulingMode::Instant, 1).await;
    let client = reqwest::Client::new();

    let (mut socket, _) = connect_async(format!("ws://127.0.0.1:{}/ws", server.port))
        .await
        .unwrap();

    let flow_id = start_and_complete(&client, &server, &seeded, seeded.scored_choice).await;
    let _ = flow_id;

    // The completion transition lands on the stream.
    let message = timeout(TEST_TIMEOUT, socket.next())
        .await
        .expect("ws message in time")
        .unwrap()
        .unwrap();
    let Message::Text(text) = message else {
        panic!("expected a text frame");
    };
    let notification: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(notification["previous_status"], "form_started");
    assert_eq!(notification["new_status"], "form_completed");
}

/// Property walk: random transition requests never land the flow in a state
/// outside the legal edge set, and the ledger chain stays consistent.
#[tokio::test]
async fn random_walk_stays_on_legal_edges() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let all = [
        FlowStatus::FormStarted,
        FlowStatus::FormCompleted,
        FlowStatus::Qualifying,
        FlowStatus::Qualified,
        FlowStatus::Disqualified,
        FlowStatus::SpamDetected,
        FlowStatus::SchedulingOptions,
        FlowStatus::BookingPending,
        FlowStatus::BookingConfirmed,
        FlowStatus::BookingFailed,
        FlowStatus::Abandoned,
    ];
    let mut rng = StdRng::seed_from_u64(42);

    let server = start_server(85).await;
    for _ in 0..20 {
        let flow = server
            .engine
            .create_flow(Uuid::new_v4(), Uuid::new_v4(), None)
            .await
            .unwrap();

        for _ in 0..40 {
            let target = all[rng.gen_range(0..all.len())];
            let before = server.store.get_flow(flow.id).await.unwrap().unwrap();
            match server
                .engine
                .transition(flow.id, target, EventPayload::None)
                .await
            {
                Ok(after) => {
                    assert!(
                        before.status.can_transition_to(after.status),
                        "illegal committed edge {} -> {}",
                        before.status,
                        after.status
                    );
                }
                Err(_) => {
                    let after = server.store.get_flow(flow.id).await.unwrap().unwrap();
                    assert_eq!(before.status, after.status, "failed transition mutated the flow");
                }
            }
        }

        let events = server.store.list_events(flow.id).await.unwrap();
        for window in events.windows(2) {
            assert_eq!(window[0].new_status, window[1].previous_status);
        }
    }
}
