//! libSQL backend — async `FlowStore` trait implementation.
//!
//! Supports local file and in-memory databases. One connection is reused for
//! all operations; `libsql::Connection` is `Send + Sync` and safe for
//! concurrent async use. Flow writes are version-checked so racing transitions
//! resolve to a single winner.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::analysis::{AiAnalysisSession, AnalysisKind, ProspectInsight, SchedulingRecommendation};
use crate::error::DatabaseError;
use crate::flow::event::{EventPayload, FlowEvent, FlowEventKind};
use crate::flow::model::{Booking, BookingStatus, EventType, Flow};
use crate::flow::status::{FlowStatus, PriorityLevel, SchedulingMode};
use crate::forms::{Form, FormResponse};
use crate::scheduling::slots::AvailabilitySlot;
use crate::store::migrations;
use crate::store::traits::FlowStore;

/// libSQL store backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.set_connection_pragmas().await?;
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.set_connection_pragmas().await?;
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Apply connection-level PRAGMAs. Referential integrity is enforced in
    /// application code (see `delete_form`), matching SQLite's default of
    /// disabled foreign-key enforcement; libSQL enables it by default, so set
    /// it back explicitly.
    async fn set_connection_pragmas(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute("PRAGMA foreign_keys = OFF", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to set PRAGMA: {e}")))?;
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_optional_uuid(s: &Option<String>) -> Option<Uuid> {
    s.as_ref().map(|s| parse_uuid(s))
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to a libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> libsql::Value {
    match dt {
        Some(dt) => libsql::Value::Text(dt.to_rfc3339()),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

/// Map a libsql error to Constraint or Query depending on the cause.
fn map_write_err(op: &str, e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE") || msg.contains("constraint") {
        DatabaseError::Constraint(format!("{op}: {msg}"))
    } else {
        DatabaseError::Query(format!("{op}: {msg}"))
    }
}

// ── Row mappers ─────────────────────────────────────────────────────

const FLOW_COLUMNS: &str = "id, organization_id, form_id, response_id, event_type_id, booking_id, \
     status, scheduling_mode, current_step, completion_percentage, version, \
     qualification_score, intent_score, priority_level, prospect_summary, \
     spam_score, spam_flags, requires_approval, needs_manual_review, \
     approved_by, approved_at, email_verified, email_verified_at, \
     started_at, form_completed_at, qualification_completed_at, \
     scheduling_started_at, booking_completed_at, abandoned_at, last_active_at";

fn row_to_flow(row: &libsql::Row) -> Result<Flow, libsql::Error> {
    let id: String = row.get(0)?;
    let organization_id: String = row.get(1)?;
    let form_id: String = row.get(2)?;
    let response_id: Option<String> = row.get(3).ok();
    let event_type_id: Option<String> = row.get(4).ok();
    let booking_id: Option<String> = row.get(5).ok();
    let status_str: String = row.get(6)?;
    let mode_str: String = row.get(7)?;
    let priority_str: Option<String> = row.get(13).ok();
    let spam_flags_str: String = row.get::<String>(16).unwrap_or_else(|_| "[]".into());
    let approved_at: Option<String> = row.get(20).ok();
    let email_verified_at: Option<String> = row.get(22).ok();
    let started_str: String = row.get(23)?;
    let form_completed: Option<String> = row.get(24).ok();
    let qualification_completed: Option<String> = row.get(25).ok();
    let scheduling_started: Option<String> = row.get(26).ok();
    let booking_completed: Option<String> = row.get(27).ok();
    let abandoned: Option<String> = row.get(28).ok();
    let last_active_str: String = row.get(29)?;

    Ok(Flow {
        id: parse_uuid(&id),
        organization_id: parse_uuid(&organization_id),
        form_id: parse_uuid(&form_id),
        response_id: parse_optional_uuid(&response_id),
        event_type_id: parse_optional_uuid(&event_type_id),
        booking_id: parse_optional_uuid(&booking_id),
        status: FlowStatus::from_str(&status_str).unwrap_or(FlowStatus::FormStarted),
        scheduling_mode: SchedulingMode::from_str(&mode_str).unwrap_or_default(),
        current_step: row.get::<i64>(8)? as u32,
        completion_percentage: row.get::<i64>(9)? as u8,
        version: row.get(10)?,
        qualification_score: row.get::<i64>(11).ok().map(|v| v as u8),
        intent_score: row.get::<i64>(12).ok().map(|v| v as u8),
        priority_level: priority_str.as_deref().and_then(|s| PriorityLevel::from_str(s).ok()),
        prospect_summary: row.get(14).ok(),
        spam_score: row.get::<i64>(15)? as u8,
        spam_flags: serde_json::from_str(&spam_flags_str).unwrap_or_default(),
        requires_approval: row.get::<i64>(17)? != 0,
        needs_manual_review: row.get::<i64>(18)? != 0,
        approved_by: row.get(19).ok(),
        approved_at: parse_optional_datetime(&approved_at),
        email_verified: row.get::<i64>(21)? != 0,
        email_verified_at: parse_optional_datetime(&email_verified_at),
        started_at: parse_datetime(&started_str),
        form_completed_at: parse_optional_datetime(&form_completed),
        qualification_completed_at: parse_optional_datetime(&qualification_completed),
        scheduling_started_at: parse_optional_datetime(&scheduling_started),
        booking_completed_at: parse_optional_datetime(&booking_completed),
        abandoned_at: parse_optional_datetime(&abandoned),
        last_active_at: parse_datetime(&last_active_str),
    })
}

const EVENT_COLUMNS: &str = "id, flow_id, kind, previous_status, new_status, payload, created_at";

fn row_to_event(row: &libsql::Row) -> Result<FlowEvent, libsql::Error> {
    let id: String = row.get(0)?;
    let flow_id: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let previous_str: String = row.get(3)?;
    let new_str: String = row.get(4)?;
    let payload_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(FlowEvent {
        id: parse_uuid(&id),
        flow_id: parse_uuid(&flow_id),
        kind: FlowEventKind::from_str(&kind_str).unwrap_or(FlowEventKind::StatusChanged),
        previous_status: FlowStatus::from_str(&previous_str).unwrap_or(FlowStatus::FormStarted),
        new_status: FlowStatus::from_str(&new_str).unwrap_or(FlowStatus::FormStarted),
        payload: serde_json::from_str::<EventPayload>(&payload_str).unwrap_or_default(),
        created_at: parse_datetime(&created_str),
    })
}

const SESSION_COLUMNS: &str = "id, flow_id, kind, input, raw_response, parsed, confidence, \
     was_successful, retry_count, input_tokens, output_tokens, cost, created_at";

fn row_to_session(row: &libsql::Row) -> Result<AiAnalysisSession, libsql::Error> {
    let id: String = row.get(0)?;
    let flow_id: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let input_str: String = row.get::<String>(3).unwrap_or_else(|_| "{}".into());
    let parsed_str: Option<String> = row.get(5).ok();
    let cost_str: String = row.get::<String>(11).unwrap_or_else(|_| "0".into());
    let created_str: String = row.get(12)?;

    Ok(AiAnalysisSession {
        id: parse_uuid(&id),
        flow_id: parse_uuid(&flow_id),
        kind: AnalysisKind::from_str(&kind_str).unwrap_or(AnalysisKind::Qualification),
        input: serde_json::from_str(&input_str).unwrap_or(serde_json::json!({})),
        raw_response: row.get(4).ok(),
        parsed: parsed_str.as_deref().and_then(|s| serde_json::from_str(s).ok()),
        confidence: row.get::<f64>(6).ok().map(|v| v as f32),
        was_successful: row.get::<i64>(7)? != 0,
        retry_count: row.get::<i64>(8)? as u32,
        input_tokens: row.get::<i64>(9)? as u32,
        output_tokens: row.get::<i64>(10)? as u32,
        cost: Decimal::from_str(&cost_str).unwrap_or(Decimal::ZERO),
        created_at: parse_datetime(&created_str),
    })
}

const SLOT_COLUMNS: &str = "id, event_type_id, starts_at, ends_at, max_bookings, current_bookings";

fn row_to_slot(row: &libsql::Row) -> Result<AvailabilitySlot, libsql::Error> {
    let id: String = row.get(0)?;
    let event_type_id: String = row.get(1)?;
    let starts_str: String = row.get(2)?;
    let ends_str: String = row.get(3)?;

    Ok(AvailabilitySlot {
        id: parse_uuid(&id),
        event_type_id: parse_uuid(&event_type_id),
        starts_at: parse_datetime(&starts_str),
        ends_at: parse_datetime(&ends_str),
        max_bookings: row.get::<i64>(4)? as u32,
        current_bookings: row.get::<i64>(5)? as u32,
    })
}

const BOOKING_COLUMNS: &str = "id, flow_id, slot_id, starts_at, ends_at, status, created_at";

fn row_to_booking(row: &libsql::Row) -> Result<Booking, libsql::Error> {
    let id: String = row.get(0)?;
    let flow_id: String = row.get(1)?;
    let slot_id: String = row.get(2)?;
    let starts_str: String = row.get(3)?;
    let ends_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(Booking {
        id: parse_uuid(&id),
        flow_id: parse_uuid(&flow_id),
        slot_id: parse_uuid(&slot_id),
        starts_at: parse_datetime(&starts_str),
        ends_at: parse_datetime(&ends_str),
        status: BookingStatus::from_str(&status_str).unwrap_or(BookingStatus::Pending),
        created_at: parse_datetime(&created_str),
    })
}

const EVENT_TYPE_COLUMNS: &str = "id, organization_id, name, scheduling_mode, \
     minimum_qualification_score, duration_minutes, buffer_minutes, daily_booking_limit, \
     custom_prompt, created_at";

fn row_to_event_type(row: &libsql::Row) -> Result<EventType, libsql::Error> {
    let id: String = row.get(0)?;
    let organization_id: String = row.get(1)?;
    let mode_str: String = row.get(3)?;
    let created_str: String = row.get(9)?;

    Ok(EventType {
        id: parse_uuid(&id),
        organization_id: parse_uuid(&organization_id),
        name: row.get(2)?,
        scheduling_mode: SchedulingMode::from_str(&mode_str).unwrap_or_default(),
        minimum_qualification_score: row.get::<i64>(4).ok().map(|v| v as u8),
        duration_minutes: row.get::<i64>(5)? as u32,
        buffer_minutes: row.get::<i64>(6)? as u32,
        daily_booking_limit: row.get::<i64>(7).ok().map(|v| v as u32),
        custom_prompt: row.get(8).ok(),
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl FlowStore for LibSqlBackend {
    // ── Flows ───────────────────────────────────────────────────────

    async fn insert_flow(&self, flow: &Flow) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let spam_flags = serde_json::to_string(&flow.spam_flags)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO flows (id, organization_id, form_id, response_id, event_type_id, booking_id, \
                status, scheduling_mode, current_step, completion_percentage, version, \
                qualification_score, intent_score, priority_level, prospect_summary, \
                spam_score, spam_flags, requires_approval, needs_manual_review, \
                approved_by, approved_at, email_verified, email_verified_at, \
                started_at, form_completed_at, qualification_completed_at, \
                scheduling_started_at, booking_completed_at, abandoned_at, last_active_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30)",
            params![
                flow.id.to_string(),
                flow.organization_id.to_string(),
                flow.form_id.to_string(),
                opt_text_owned(flow.response_id.map(|u| u.to_string())),
                opt_text_owned(flow.event_type_id.map(|u| u.to_string())),
                opt_text_owned(flow.booking_id.map(|u| u.to_string())),
                flow.status.as_str(),
                flow.scheduling_mode.as_str(),
                flow.current_step as i64,
                flow.completion_percentage as i64,
                flow.version,
                opt_int(flow.qualification_score.map(i64::from)),
                opt_int(flow.intent_score.map(i64::from)),
                opt_text(flow.priority_level.map(|p| p.as_str())),
                opt_text(flow.prospect_summary.as_deref()),
                flow.spam_score as i64,
                spam_flags,
                flow.requires_approval as i64,
                flow.needs_manual_review as i64,
                opt_text(flow.approved_by.as_deref()),
                opt_datetime(flow.approved_at),
                flow.email_verified as i64,
                opt_datetime(flow.email_verified_at),
                flow.started_at.to_rfc3339(),
                opt_datetime(flow.form_completed_at),
                opt_datetime(flow.qualification_completed_at),
                opt_datetime(flow.scheduling_started_at),
                opt_datetime(flow.booking_completed_at),
                opt_datetime(flow.abandoned_at),
                flow.last_active_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_write_err("insert_flow", e))?;

        debug!(flow_id = %flow.id, "Flow inserted");
        Ok(())
    }

    async fn get_flow(&self, id: Uuid) -> Result<Option<Flow>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {FLOW_COLUMNS} FROM flows WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_flow: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let flow = row_to_flow(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_flow row parse: {e}")))?;
                Ok(Some(flow))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_flow: {e}"))),
        }
    }

    async fn update_flow(&self, flow: &Flow, expected_version: i64) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let spam_flags = serde_json::to_string(&flow.spam_flags)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let affected = conn
            .execute(
                "UPDATE flows SET \
                    response_id = ?1, event_type_id = ?2, booking_id = ?3, status = ?4, \
                    scheduling_mode = ?5, current_step = ?6, completion_percentage = ?7, \
                    version = ?8, qualification_score = ?9, intent_score = ?10, \
                    priority_level = ?11, prospect_summary = ?12, spam_score = ?13, \
                    spam_flags = ?14, requires_approval = ?15, needs_manual_review = ?16, \
                    approved_by = ?17, approved_at = ?18, email_verified = ?19, \
                    email_verified_at = ?20, form_completed_at = ?21, \
                    qualification_completed_at = ?22, scheduling_started_at = ?23, \
                    booking_completed_at = ?24, abandoned_at = ?25, last_active_at = ?26 \
                 WHERE id = ?27 AND version = ?28",
                params![
                    opt_text_owned(flow.response_id.map(|u| u.to_string())),
                    opt_text_owned(flow.event_type_id.map(|u| u.to_string())),
                    opt_text_owned(flow.booking_id.map(|u| u.to_string())),
                    flow.status.as_str(),
                    flow.scheduling_mode.as_str(),
                    flow.current_step as i64,
                    flow.completion_percentage as i64,
                    expected_version + 1,
                    opt_int(flow.qualification_score.map(i64::from)),
                    opt_int(flow.intent_score.map(i64::from)),
                    opt_text(flow.priority_level.map(|p| p.as_str())),
                    opt_text(flow.prospect_summary.as_deref()),
                    flow.spam_score as i64,
                    spam_flags,
                    flow.requires_approval as i64,
                    flow.needs_manual_review as i64,
                    opt_text(flow.approved_by.as_deref()),
                    opt_datetime(flow.approved_at),
                    flow.email_verified as i64,
                    opt_datetime(flow.email_verified_at),
                    opt_datetime(flow.form_completed_at),
                    opt_datetime(flow.qualification_completed_at),
                    opt_datetime(flow.scheduling_started_at),
                    opt_datetime(flow.booking_completed_at),
                    opt_datetime(flow.abandoned_at),
                    flow.last_active_at.to_rfc3339(),
                    flow.id.to_string(),
                    expected_version,
                ],
            )
            .await
            .map_err(|e| map_write_err("update_flow", e))?;

        Ok(affected > 0)
    }

    async fn list_active_flows(&self) -> Result<Vec<Flow>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {FLOW_COLUMNS} FROM flows WHERE status IN \
                     ('form_started', 'form_completed', 'qualifying', 'qualified', \
                      'scheduling_options', 'booking_pending') \
                     ORDER BY last_active_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_active_flows: {e}")))?;

        let mut flows = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_flow(&row) {
                Ok(flow) => flows.push(flow),
                Err(e) => tracing::warn!("Skipping flow row: {e}"),
            }
        }
        Ok(flows)
    }

    async fn list_review_queue(&self) -> Result<Vec<Flow>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {FLOW_COLUMNS} FROM flows \
                     WHERE needs_manual_review = 1 AND status = 'qualifying' \
                     ORDER BY last_active_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_review_queue: {e}")))?;

        let mut flows = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_flow(&row) {
                Ok(flow) => flows.push(flow),
                Err(e) => tracing::warn!("Skipping review queue row: {e}"),
            }
        }
        Ok(flows)
    }

    // ── Event log ───────────────────────────────────────────────────

    async fn append_event(&self, event: &FlowEvent) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO flow_events (id, flow_id, kind, previous_status, new_status, payload, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id.to_string(),
                event.flow_id.to_string(),
                event.kind.as_str(),
                event.previous_status.as_str(),
                event.new_status.as_str(),
                payload,
                event.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_write_err("append_event", e))?;

        Ok(())
    }

    async fn list_events(&self, flow_id: Uuid) -> Result<Vec<FlowEvent>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM flow_events WHERE flow_id = ?1 ORDER BY created_at ASC, id ASC"
                ),
                params![flow_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_events: {e}")))?;

        let mut events = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_event(&row) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("Skipping event row: {e}"),
            }
        }
        Ok(events)
    }

    // ── Forms & responses ───────────────────────────────────────────

    async fn insert_form(&self, form: &Form) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let questions = serde_json::to_string(&form.questions)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO forms (id, organization_id, name, questions, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                form.id.to_string(),
                form.organization_id.to_string(),
                form.name.clone(),
                questions,
                form.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_write_err("insert_form", e))?;
        Ok(())
    }

    async fn get_form(&self, id: Uuid) -> Result<Option<Form>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT id, organization_id, name, questions, created_at FROM forms WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_form: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id_str: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let org_str: String = row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let name: String = row.get(2).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let questions_str: String =
                    row.get::<String>(3).unwrap_or_else(|_| "[]".into());
                let created_str: String =
                    row.get(4).map_err(|e| DatabaseError::Query(e.to_string()))?;
                Ok(Some(Form {
                    id: parse_uuid(&id_str),
                    organization_id: parse_uuid(&org_str),
                    name,
                    questions: serde_json::from_str(&questions_str).unwrap_or_default(),
                    created_at: parse_datetime(&created_str),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_form: {e}"))),
        }
    }

    async fn delete_form(&self, id: Uuid) -> Result<(), DatabaseError> {
        let conn = self.conn();
        // Restrict-delete: forms with active flows cannot be removed.
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM flows WHERE form_id = ?1 AND status IN \
                 ('form_started', 'form_completed', 'qualifying', 'qualified', \
                  'scheduling_options', 'booking_pending')",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_form: {e}")))?;

        if let Ok(Some(row)) = rows.next().await {
            let active: i64 = row.get(0).unwrap_or(0);
            if active > 0 {
                return Err(DatabaseError::Constraint(format!(
                    "form {id} has {active} active flow(s)"
                )));
            }
        }

        conn.execute("DELETE FROM forms WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_form: {e}")))?;
        Ok(())
    }

    async fn insert_response(&self, response: &FormResponse) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let answers = serde_json::to_string(&response.answers)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO form_responses (id, form_id, respondent_email, respondent_name, answers, completed, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                response.id.to_string(),
                response.form_id.to_string(),
                response.respondent_email.clone(),
                opt_text(response.respondent_name.as_deref()),
                answers,
                response.completed as i64,
                response.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_write_err("insert_response", e))?;
        Ok(())
    }

    async fn get_response(&self, id: Uuid) -> Result<Option<FormResponse>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT id, form_id, respondent_email, respondent_name, answers, completed, created_at \
                 FROM form_responses WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_response: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id_str: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let form_str: String =
                    row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let email: String = row.get(2).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let answers_str: String = row.get::<String>(4).unwrap_or_else(|_| "[]".into());
                let completed: i64 = row.get(5).unwrap_or(0);
                let created_str: String =
                    row.get(6).map_err(|e| DatabaseError::Query(e.to_string()))?;
                Ok(Some(FormResponse {
                    id: parse_uuid(&id_str),
                    form_id: parse_uuid(&form_str),
                    respondent_email: email,
                    respondent_name: row.get(3).ok(),
                    answers: serde_json::from_str(&answers_str).unwrap_or_default(),
                    completed: completed != 0,
                    created_at: parse_datetime(&created_str),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_response: {e}"))),
        }
    }

    // ── Event types ─────────────────────────────────────────────────

    async fn insert_event_type(&self, event_type: &EventType) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO event_types (id, organization_id, name, scheduling_mode, \
                minimum_qualification_score, duration_minutes, buffer_minutes, \
                daily_booking_limit, custom_prompt, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event_type.id.to_string(),
                event_type.organization_id.to_string(),
                event_type.name.clone(),
                event_type.scheduling_mode.as_str(),
                opt_int(event_type.minimum_qualification_score.map(i64::from)),
                event_type.duration_minutes as i64,
                event_type.buffer_minutes as i64,
                opt_int(event_type.daily_booking_limit.map(i64::from)),
                opt_text(event_type.custom_prompt.as_deref()),
                event_type.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_write_err("insert_event_type", e))?;
        Ok(())
    }

    async fn get_event_type(&self, id: Uuid) -> Result<Option<EventType>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {EVENT_TYPE_COLUMNS} FROM event_types WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_event_type: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let event_type = row_to_event_type(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_event_type row parse: {e}")))?;
                Ok(Some(event_type))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_event_type: {e}"))),
        }
    }

    // ── Analysis sessions & derived outputs ─────────────────────────

    async fn record_analysis_session(
        &self,
        session: &AiAnalysisSession,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let input = serde_json::to_string(&session.input)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let parsed = match &session.parsed {
            Some(verdict) => Some(
                serde_json::to_string(verdict)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            ),
            None => None,
        };
        let confidence: libsql::Value = match session.confidence {
            Some(c) => libsql::Value::Real(f64::from(c)),
            None => libsql::Value::Null,
        };

        conn.execute(
            "INSERT INTO analysis_sessions (id, flow_id, kind, input, raw_response, parsed, \
                confidence, was_successful, retry_count, input_tokens, output_tokens, cost, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                session.id.to_string(),
                session.flow_id.to_string(),
                session.kind.as_str(),
                input,
                opt_text(session.raw_response.as_deref()),
                opt_text_owned(parsed),
                confidence,
                session.was_successful as i64,
                session.retry_count as i64,
                session.input_tokens as i64,
                session.output_tokens as i64,
                session.cost.to_string(),
                session.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_write_err("record_analysis_session", e))?;

        debug!(
            flow_id = %session.flow_id,
            kind = %session.kind,
            retry = session.retry_count,
            successful = session.was_successful,
            "Analysis session recorded"
        );
        Ok(())
    }

    async fn list_analysis_sessions(
        &self,
        flow_id: Uuid,
    ) -> Result<Vec<AiAnalysisSession>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM analysis_sessions WHERE flow_id = ?1 \
                     ORDER BY created_at ASC, retry_count ASC"
                ),
                params![flow_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_analysis_sessions: {e}")))?;

        let mut sessions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_session(&row) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!("Skipping session row: {e}"),
            }
        }
        Ok(sessions)
    }

    async fn has_completed_session(
        &self,
        flow_id: Uuid,
        kind: AnalysisKind,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM analysis_sessions \
                 WHERE flow_id = ?1 AND kind = ?2 AND was_successful = 1",
                params![flow_id.to_string(), kind.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_completed_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count > 0)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_insight(&self, insight: &ProspectInsight) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let pain_points = serde_json::to_string(&insight.pain_points)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let buying_signals = serde_json::to_string(&insight.buying_signals)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO prospect_insights (id, flow_id, summary, pain_points, buying_signals, \
                recommended_approach, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
             ON CONFLICT (flow_id) DO UPDATE SET \
                summary = excluded.summary, pain_points = excluded.pain_points, \
                buying_signals = excluded.buying_signals, \
                recommended_approach = excluded.recommended_approach, \
                updated_at = excluded.updated_at",
            params![
                insight.id.to_string(),
                insight.flow_id.to_string(),
                insight.summary.clone(),
                pain_points,
                buying_signals,
                opt_text(insight.recommended_approach.as_deref()),
                insight.created_at.to_rfc3339(),
                insight.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_write_err("upsert_insight", e))?;
        Ok(())
    }

    async fn get_insight(&self, flow_id: Uuid) -> Result<Option<ProspectInsight>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT id, flow_id, summary, pain_points, buying_signals, recommended_approach, \
                        created_at, updated_at \
                 FROM prospect_insights WHERE flow_id = ?1",
                params![flow_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_insight: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id_str: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let flow_str: String =
                    row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let summary: String =
                    row.get(2).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let pain_str: String = row.get::<String>(3).unwrap_or_else(|_| "[]".into());
                let signals_str: String = row.get::<String>(4).unwrap_or_else(|_| "[]".into());
                let created_str: String =
                    row.get(6).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let updated_str: String =
                    row.get(7).map_err(|e| DatabaseError::Query(e.to_string()))?;
                Ok(Some(ProspectInsight {
                    id: parse_uuid(&id_str),
                    flow_id: parse_uuid(&flow_str),
                    summary,
                    pain_points: serde_json::from_str(&pain_str).unwrap_or_default(),
                    buying_signals: serde_json::from_str(&signals_str).unwrap_or_default(),
                    recommended_approach: row.get(5).ok(),
                    created_at: parse_datetime(&created_str),
                    updated_at: parse_datetime(&updated_str),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_insight: {e}"))),
        }
    }

    async fn upsert_recommendation(
        &self,
        recommendation: &SchedulingRecommendation,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let slot_ids = serde_json::to_string(&recommendation.curated_slot_ids)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO scheduling_recommendations (id, flow_id, recommended_duration_minutes, \
                urgency, curated_slot_ids, curated_slots_generated, curated_sent_at, \
                curated_viewed_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT (flow_id) DO UPDATE SET \
                recommended_duration_minutes = excluded.recommended_duration_minutes, \
                urgency = excluded.urgency, curated_slot_ids = excluded.curated_slot_ids, \
                curated_slots_generated = excluded.curated_slots_generated, \
                curated_sent_at = excluded.curated_sent_at, \
                curated_viewed_at = excluded.curated_viewed_at, \
                updated_at = excluded.updated_at",
            params![
                recommendation.id.to_string(),
                recommendation.flow_id.to_string(),
                recommendation.recommended_duration_minutes as i64,
                recommendation.urgency.as_str(),
                slot_ids,
                recommendation.curated_slots_generated as i64,
                opt_datetime(recommendation.curated_sent_at),
                opt_datetime(recommendation.curated_viewed_at),
                recommendation.created_at.to_rfc3339(),
                recommendation.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_write_err("upsert_recommendation", e))?;
        Ok(())
    }

    async fn get_recommendation(
        &self,
        flow_id: Uuid,
    ) -> Result<Option<SchedulingRecommendation>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT id, flow_id, recommended_duration_minutes, urgency, curated_slot_ids, \
                        curated_slots_generated, curated_sent_at, curated_viewed_at, \
                        created_at, updated_at \
                 FROM scheduling_recommendations WHERE flow_id = ?1",
                params![flow_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_recommendation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id_str: String = row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let flow_str: String =
                    row.get(1).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let urgency_str: String =
                    row.get::<String>(3).unwrap_or_else(|_| "medium".into());
                let slot_ids_str: String = row.get::<String>(4).unwrap_or_else(|_| "[]".into());
                let generated: i64 = row.get(5).unwrap_or(0);
                let sent: Option<String> = row.get(6).ok();
                let viewed: Option<String> = row.get(7).ok();
                let created_str: String =
                    row.get(8).map_err(|e| DatabaseError::Query(e.to_string()))?;
                let updated_str: String =
                    row.get(9).map_err(|e| DatabaseError::Query(e.to_string()))?;
                Ok(Some(SchedulingRecommendation {
                    id: parse_uuid(&id_str),
                    flow_id: parse_uuid(&flow_str),
                    recommended_duration_minutes: row.get::<i64>(2).unwrap_or(30) as u32,
                    urgency: PriorityLevel::from_str(&urgency_str)
                        .unwrap_or(PriorityLevel::Medium),
                    curated_slot_ids: serde_json::from_str(&slot_ids_str).unwrap_or_default(),
                    curated_slots_generated: generated != 0,
                    curated_sent_at: parse_optional_datetime(&sent),
                    curated_viewed_at: parse_optional_datetime(&viewed),
                    created_at: parse_datetime(&created_str),
                    updated_at: parse_datetime(&updated_str),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_recommendation: {e}"))),
        }
    }

    // ── Slots & bookings ────────────────────────────────────────────

    async fn insert_slot(&self, slot: &AvailabilitySlot) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO availability_slots (id, event_type_id, starts_at, ends_at, max_bookings, current_bookings) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                slot.id.to_string(),
                slot.event_type_id.to_string(),
                slot.starts_at.to_rfc3339(),
                slot.ends_at.to_rfc3339(),
                slot.max_bookings as i64,
                slot.current_bookings as i64,
            ],
        )
        .await
        .map_err(|e| map_write_err("insert_slot", e))?;
        Ok(())
    }

    async fn get_slot(&self, id: Uuid) -> Result<Option<AvailabilitySlot>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {SLOT_COLUMNS} FROM availability_slots WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_slot: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let slot = row_to_slot(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_slot row parse: {e}")))?;
                Ok(Some(slot))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_slot: {e}"))),
        }
    }

    async fn list_open_slots(
        &self,
        event_type_id: Uuid,
        from: DateTime<Utc>,
    ) -> Result<Vec<AvailabilitySlot>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {SLOT_COLUMNS} FROM availability_slots \
                     WHERE event_type_id = ?1 AND starts_at >= ?2 \
                       AND current_bookings < max_bookings \
                     ORDER BY starts_at ASC"
                ),
                params![event_type_id.to_string(), from.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_open_slots: {e}")))?;

        let mut slots = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_slot(&row) {
                Ok(slot) => slots.push(slot),
                Err(e) => tracing::warn!("Skipping slot row: {e}"),
            }
        }
        Ok(slots)
    }

    async fn try_claim_slot(&self, slot_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        // Conditional increment: the capacity check and the claim are one
        // statement, so concurrent claims cannot oversell the slot.
        let affected = conn
            .execute(
                "UPDATE availability_slots SET current_bookings = current_bookings + 1 \
                 WHERE id = ?1 AND current_bookings < max_bookings",
                params![slot_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("try_claim_slot: {e}")))?;

        Ok(affected > 0)
    }

    async fn release_slot(&self, slot_id: Uuid) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE availability_slots SET current_bookings = current_bookings - 1 \
             WHERE id = ?1 AND current_bookings > 0",
            params![slot_id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("release_slot: {e}")))?;
        Ok(())
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO bookings (id, flow_id, slot_id, starts_at, ends_at, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                booking.id.to_string(),
                booking.flow_id.to_string(),
                booking.slot_id.to_string(),
                booking.starts_at.to_rfc3339(),
                booking.ends_at.to_rfc3339(),
                booking.status.as_str(),
                booking.created_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| map_write_err("insert_booking", e))?;
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_booking: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let booking = row_to_booking(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_booking row parse: {e}")))?;
                Ok(Some(booking))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_booking: {e}"))),
        }
    }

    async fn update_booking_status(
        &self,
        id: Uuid,
        status: BookingStatus,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE bookings SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("update_booking_status: {e}")))?;
        Ok(())
    }

    async fn delete_booking(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        // Set-null on the owning flow first: the flow survives the deletion.
        conn.execute(
            "UPDATE flows SET booking_id = NULL, version = version + 1 WHERE booking_id = ?1",
            params![id.to_string()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("delete_booking unlink: {e}")))?;

        let affected = conn
            .execute("DELETE FROM bookings WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_booking: {e}")))?;
        Ok(affected > 0)
    }

    async fn count_bookings_on_day(
        &self,
        event_type_id: Uuid,
        day: NaiveDate,
    ) -> Result<u32, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM bookings b \
                 JOIN availability_slots s ON b.slot_id = s.id \
                 WHERE s.event_type_id = ?1 AND date(b.starts_at) = ?2 AND b.status != 'cancelled'",
                params![event_type_id.to_string(), day.format("%Y-%m-%d").to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_bookings_on_day: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count as u32)
            }
            _ => Ok(0),
        }
    }

    // ── Analytics counters ──────────────────────────────────────────

    async fn increment_counter(
        &self,
        organization_id: Uuid,
        name: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO flow_counters (organization_id, name, value, updated_at) \
             VALUES (?1, ?2, 1, ?3) \
             ON CONFLICT (organization_id, name) DO UPDATE SET \
                value = value + 1, updated_at = ?3",
            params![organization_id.to_string(), name, now],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("increment_counter: {e}")))?;
        Ok(())
    }

    async fn get_counter(
        &self,
        organization_id: Uuid,
        name: &str,
    ) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT value FROM flow_counters WHERE organization_id = ?1 AND name = ?2",
                params![organization_id.to_string(), name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_counter: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get(0).unwrap_or(0)),
            _ => Ok(0),
        }
    }
}
