//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks the
//! current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "forms_and_flows",
        sql: r#"
            CREATE TABLE IF NOT EXISTS forms (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                name TEXT NOT NULL,
                questions TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_forms_org ON forms(organization_id);

            CREATE TABLE IF NOT EXISTS form_responses (
                id TEXT PRIMARY KEY,
                form_id TEXT NOT NULL REFERENCES forms(id),
                respondent_email TEXT NOT NULL,
                respondent_name TEXT,
                answers TEXT NOT NULL DEFAULT '[]',
                completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_responses_form ON form_responses(form_id);

            CREATE TABLE IF NOT EXISTS event_types (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                name TEXT NOT NULL,
                scheduling_mode TEXT NOT NULL DEFAULT 'instant',
                minimum_qualification_score INTEGER,
                duration_minutes INTEGER NOT NULL DEFAULT 30,
                buffer_minutes INTEGER NOT NULL DEFAULT 60,
                daily_booking_limit INTEGER,
                custom_prompt TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_event_types_org ON event_types(organization_id);

            CREATE TABLE IF NOT EXISTS flows (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                form_id TEXT NOT NULL REFERENCES forms(id),
                response_id TEXT UNIQUE,
                event_type_id TEXT,
                booking_id TEXT UNIQUE,
                status TEXT NOT NULL DEFAULT 'form_started',
                scheduling_mode TEXT NOT NULL DEFAULT 'instant',
                current_step INTEGER NOT NULL DEFAULT 0,
                completion_percentage INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 0,
                qualification_score INTEGER,
                intent_score INTEGER,
                priority_level TEXT,
                prospect_summary TEXT,
                spam_score INTEGER NOT NULL DEFAULT 0,
                spam_flags TEXT NOT NULL DEFAULT '[]',
                requires_approval INTEGER NOT NULL DEFAULT 0,
                needs_manual_review INTEGER NOT NULL DEFAULT 0,
                approved_by TEXT,
                approved_at TEXT,
                email_verified INTEGER NOT NULL DEFAULT 0,
                email_verified_at TEXT,
                started_at TEXT NOT NULL,
                form_completed_at TEXT,
                qualification_completed_at TEXT,
                scheduling_started_at TEXT,
                booking_completed_at TEXT,
                abandoned_at TEXT,
                last_active_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_flows_org ON flows(organization_id);
            CREATE INDEX IF NOT EXISTS idx_flows_status ON flows(status);
            CREATE INDEX IF NOT EXISTS idx_flows_last_active ON flows(last_active_at);

            CREATE TABLE IF NOT EXISTS flow_events (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL REFERENCES flows(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                previous_status TEXT NOT NULL,
                new_status TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{"kind":"none"}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_flow_events_flow ON flow_events(flow_id);
            CREATE INDEX IF NOT EXISTS idx_flow_events_created ON flow_events(created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "analysis_records",
        sql: r#"
            CREATE TABLE IF NOT EXISTS analysis_sessions (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL REFERENCES flows(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                input TEXT NOT NULL DEFAULT '{}',
                raw_response TEXT,
                parsed TEXT,
                confidence REAL,
                was_successful INTEGER NOT NULL DEFAULT 0,
                retry_count INTEGER NOT NULL DEFAULT 0,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cost TEXT NOT NULL DEFAULT '0',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_analysis_sessions_flow ON analysis_sessions(flow_id);
            CREATE INDEX IF NOT EXISTS idx_analysis_sessions_kind ON analysis_sessions(kind);

            CREATE TABLE IF NOT EXISTS prospect_insights (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL UNIQUE REFERENCES flows(id) ON DELETE CASCADE,
                summary TEXT NOT NULL,
                pain_points TEXT NOT NULL DEFAULT '[]',
                buying_signals TEXT NOT NULL DEFAULT '[]',
                recommended_approach TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scheduling_recommendations (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL UNIQUE REFERENCES flows(id) ON DELETE CASCADE,
                recommended_duration_minutes INTEGER NOT NULL DEFAULT 30,
                urgency TEXT NOT NULL DEFAULT 'medium',
                curated_slot_ids TEXT NOT NULL DEFAULT '[]',
                curated_slots_generated INTEGER NOT NULL DEFAULT 0,
                curated_sent_at TEXT,
                curated_viewed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        name: "scheduling_and_counters",
        sql: r#"
            CREATE TABLE IF NOT EXISTS availability_slots (
                id TEXT PRIMARY KEY,
                event_type_id TEXT NOT NULL REFERENCES event_types(id),
                starts_at TEXT NOT NULL,
                ends_at TEXT NOT NULL,
                max_bookings INTEGER NOT NULL DEFAULT 1,
                current_bookings INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_slots_event_type ON availability_slots(event_type_id);
            CREATE INDEX IF NOT EXISTS idx_slots_starts ON availability_slots(starts_at);

            CREATE TABLE IF NOT EXISTS bookings (
                id TEXT PRIMARY KEY,
                flow_id TEXT NOT NULL REFERENCES flows(id),
                slot_id TEXT NOT NULL REFERENCES availability_slots(id),
                starts_at TEXT NOT NULL,
                ends_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_bookings_flow ON bookings(flow_id);
            CREATE INDEX IF NOT EXISTS idx_bookings_slot ON bookings(slot_id);

            CREATE TABLE IF NOT EXISTS flow_counters (
                organization_id TEXT NOT NULL,
                name TEXT NOT NULL,
                value INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (organization_id, name)
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::debug!("Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Record that a migration version has been applied.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to seed migration V{version}: {e}")))?;
    Ok(())
}
