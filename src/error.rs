//! Error types for the SchedForm flow engine.

use std::time::Duration;

use uuid::Uuid;

use crate::flow::status::FlowStatus;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Flow state-machine errors.
///
/// All of these are recoverable by the caller: re-read the current flow and
/// retry with a corrected request. A failed transition never mutates the row.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Flow {id} not found")]
    NotFound { id: Uuid },

    #[error("Flow {id}: illegal transition from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: FlowStatus,
        to: FlowStatus,
    },

    #[error("Flow {id} is terminated in state {status}, no further transitions accepted")]
    FlowTerminated { id: Uuid, status: FlowStatus },

    #[error("Flow {id} was modified concurrently (expected version {expected})")]
    ConcurrentModification { id: Uuid, expected: i64 },

    #[error("Flow {id}: precondition failed for {target}: {reason}")]
    PreconditionFailed {
        id: Uuid,
        target: FlowStatus,
        reason: String,
    },

    #[error("Flow {id} cannot be reopened from {status} (only abandoned flows reopen)")]
    NotReopenable { id: Uuid, status: FlowStatus },
}

/// Scoring-oracle errors. Timeouts and request failures are retryable.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle call timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Oracle request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Invalid oracle response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Oracle retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OracleError {
    /// Whether this failure should be retried before routing to manual review.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RequestFailed { .. })
    }
}

/// Scheduling and booking errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("Slot {slot_id} is at capacity")]
    SlotUnavailable { slot_id: Uuid },

    #[error("Slot {slot_id} not found")]
    SlotNotFound { slot_id: Uuid },

    #[error("Slot {slot_id} violates the booking window: {reason}")]
    SlotNotBookable { slot_id: Uuid, reason: String },

    #[error("Daily booking limit ({limit}) reached for event type {event_type_id}")]
    DailyLimitReached { event_type_id: Uuid, limit: u32 },

    #[error("Flow {flow_id} requires approval before booking")]
    ApprovalRequired { flow_id: Uuid },

    #[error("Flow {flow_id} has no pending booking to resolve")]
    NoPendingBooking { flow_id: Uuid },

    #[error("Slot {slot_id} is not among the curated candidates for flow {flow_id}")]
    NotACuratedSlot { flow_id: Uuid, slot_id: Uuid },
}

/// Notification-layer errors. Never propagated into a flow transition.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Webhook delivery to {url} failed: {reason}")]
    WebhookFailed { url: String, reason: String },

    #[error("Recovery email to {recipient} failed: {reason}")]
    EmailFailed { recipient: String, reason: String },

    #[error("Notification bus closed")]
    BusClosed,
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
