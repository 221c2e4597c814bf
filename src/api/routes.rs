//! REST endpoints for the flow engine.
//!
//! Handlers stay thin: decode, delegate, map errors to status codes. All
//! semantics live in the engine, gateway, and dispatcher.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::warn;
use uuid::Uuid;

use crate::api::ws;
use crate::error::{DatabaseError, Error, FlowError, SchedulingError};
use crate::flow::event::EventPayload;
use crate::flow::machine::FlowEngine;
use crate::flow::status::FlowStatus;
use crate::forms::{Answer, FormResponse};
use crate::notify::NotificationBus;
use crate::qualify::{QualificationGateway, QualificationOutcome};
use crate::scheduling::SchedulingDispatcher;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FlowEngine>,
    pub gateway: Arc<QualificationGateway>,
    pub dispatcher: Arc<SchedulingDispatcher>,
    pub bus: NotificationBus,
}

/// Build the axum router for the flow API.
pub fn flow_routes(
    engine: Arc<FlowEngine>,
    gateway: Arc<QualificationGateway>,
    dispatcher: Arc<SchedulingDispatcher>,
    bus: NotificationBus,
) -> Router {
    let state = AppState {
        engine,
        gateway,
        dispatcher,
        bus,
    };

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route("/api/flows", post(start_flow))
        .route("/api/flows/{id}", get(get_flow))
        .route("/api/flows/{id}/events", get(list_events))
        .route("/api/flows/{id}/complete", post(complete_form))
        .route("/api/flows/{id}/qualify", post(qualify))
        .route("/api/flows/{id}/scheduling", post(enter_scheduling))
        .route("/api/flows/{id}/slots", get(list_slots))
        .route("/api/flows/{id}/book", post(book))
        .route("/api/flows/{id}/resolve-booking", post(resolve_booking))
        .route("/api/flows/{id}/approve", post(approve))
        .route("/api/flows/{id}/reopen", post(reopen))
        .route("/api/flows/{id}/review", post(review))
        .route("/api/review-queue", get(review_queue))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Error mapping ───────────────────────────────────────────────────────

/// Map engine errors onto HTTP statuses. Transition conflicts and capacity
/// misses are 409 (retry against current state); precondition and payload
/// problems are 422; unknown ids are 404.
fn error_response(e: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        Error::Flow(FlowError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Flow(
            FlowError::InvalidTransition { .. }
            | FlowError::FlowTerminated { .. }
            | FlowError::ConcurrentModification { .. }
            | FlowError::NotReopenable { .. },
        ) => StatusCode::CONFLICT,
        Error::Flow(FlowError::PreconditionFailed { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Scheduling(
            SchedulingError::SlotUnavailable { .. }
            | SchedulingError::ApprovalRequired { .. }
            | SchedulingError::DailyLimitReached { .. }
            | SchedulingError::NotACuratedSlot { .. },
        ) => StatusCode::CONFLICT,
        Error::Scheduling(SchedulingError::SlotNotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Scheduling(SchedulingError::SlotNotBookable { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Error::Scheduling(SchedulingError::NoPendingBooking { .. }) => StatusCode::CONFLICT,
        Error::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Database(DatabaseError::Constraint(_)) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %e, "Request failed");
    }
    (status, Json(serde_json::json!({ "error": e.to_string() })))
}

type ApiResult = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

// ── Handlers ────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "schedform"
    }))
}

#[derive(Deserialize)]
struct StartFlowRequest {
    form_id: Uuid,
    event_type_id: Option<Uuid>,
}

async fn start_flow(
    State(state): State<AppState>,
    Json(req): Json<StartFlowRequest>,
) -> ApiResult {
    let store = state.engine.store();
    let form = store
        .get_form(req.form_id)
        .await
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| {
            error_response(
                DatabaseError::NotFound {
                    entity: "form".into(),
                    id: req.form_id.to_string(),
                }
                .into(),
            )
        })?;

    let event_type = match req.event_type_id {
        Some(id) => store
            .get_event_type(id)
            .await
            .map_err(|e| error_response(e.into()))?,
        None => None,
    };

    let flow = state
        .engine
        .create_flow(form.organization_id, form.id, event_type.as_ref())
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::to_value(&flow).unwrap_or_default()))
}

async fn get_flow(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    let flow = state
        .engine
        .store()
        .get_flow(id)
        .await
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(FlowError::NotFound { id }.into()))?;
    Ok(Json(serde_json::to_value(&flow).unwrap_or_default()))
}

async fn list_events(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    let events = state
        .engine
        .store()
        .list_events(id)
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(Json(serde_json::to_value(&events).unwrap_or_default()))
}

#[derive(Deserialize)]
struct CompleteFormRequest {
    respondent_email: String,
    respondent_name: Option<String>,
    answers: Vec<Answer>,
}

async fn complete_form(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteFormRequest>,
) -> ApiResult {
    let store = state.engine.store();
    let flow = store
        .get_flow(id)
        .await
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(FlowError::NotFound { id }.into()))?;

    let mut response = FormResponse::new(flow.form_id, req.respondent_email);
    response.respondent_name = req.respondent_name;
    response.answers = req.answers;
    response.completed = true;
    store
        .insert_response(&response)
        .await
        .map_err(|e| error_response(e.into()))?;

    let response_id = response.id;
    let flow = state
        .engine
        .transition_with(id, FlowStatus::FormCompleted, EventPayload::None, move |f| {
            f.response_id = Some(response_id);
            f.completion_percentage = 100;
        })
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::to_value(&flow).unwrap_or_default()))
}

async fn qualify(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    let outcome = state.gateway.qualify(id).await.map_err(error_response)?;
    let (label, flow) = match &outcome {
        QualificationOutcome::Qualified(flow) => ("qualified", flow),
        QualificationOutcome::Disqualified(flow) => ("disqualified", flow),
        QualificationOutcome::SpamDetected(flow) => ("spam_detected", flow),
        QualificationOutcome::ManualReview(flow) => ("manual_review", flow),
        QualificationOutcome::Discarded(flow) => ("discarded", flow),
    };
    Ok(Json(serde_json::json!({
        "outcome": label,
        "flow": flow,
    })))
}

async fn enter_scheduling(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    let flow = state
        .dispatcher
        .enter_scheduling(id)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::to_value(&flow).unwrap_or_default()))
}

async fn list_slots(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    let slots = state
        .dispatcher
        .list_slots(id)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::to_value(&slots).unwrap_or_default()))
}

#[derive(Deserialize)]
struct BookRequest {
    slot_id: Uuid,
}

async fn book(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<BookRequest>,
) -> ApiResult {
    let (flow, booking) = state
        .dispatcher
        .book(id, req.slot_id)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({
        "flow": flow,
        "booking": booking,
    })))
}

#[derive(Deserialize)]
struct ResolveBookingRequest {
    confirmed: bool,
}

async fn resolve_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveBookingRequest>,
) -> ApiResult {
    let flow = state
        .dispatcher
        .resolve_booking(id, req.confirmed)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::to_value(&flow).unwrap_or_default()))
}

#[derive(Deserialize)]
struct ApproveRequest {
    approved_by: String,
}

async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult {
    let flow = state
        .dispatcher
        .approve(id, &req.approved_by)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::to_value(&flow).unwrap_or_default()))
}

async fn reopen(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult {
    let flow = state.engine.reopen(id).await.map_err(error_response)?;
    Ok(Json(serde_json::to_value(&flow).unwrap_or_default()))
}

#[derive(Deserialize)]
struct ReviewRequest {
    reviewer: String,
    qualified: bool,
}

async fn review(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> ApiResult {
    let flow = state
        .gateway
        .resolve_manual_review(id, &req.reviewer, req.qualified)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::to_value(&flow).unwrap_or_default()))
}

async fn review_queue(State(state): State<AppState>) -> ApiResult {
    let flows = state
        .engine
        .store()
        .list_review_queue()
        .await
        .map_err(|e| error_response(e.into()))?;
    Ok(Json(serde_json::to_value(&flows).unwrap_or_default()))
}
