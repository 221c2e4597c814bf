use std::sync::Arc;

use schedform::api::flow_routes;
use schedform::config::{EngineConfig, ReaperConfig};
use schedform::flow::machine::FlowEngine;
use schedform::notify::{NotificationBus, RecoveryEmailConfig, WebhookConfig};
use schedform::qualify::QualificationGateway;
use schedform::qualify::oracle::{OracleBackend, OracleConfig, create_oracle};
use schedform::reaper::{AbandonmentReaper, spawn_reaper_task};
use schedform::scheduling::SchedulingDispatcher;
use schedform::store::{FlowStore, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing; add a daily-rolling file layer when a log dir is set.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _file_guard = match std::env::var("SCHEDFORM_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(&dir, "schedform.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
            None
        }
    };

    let port: u16 = std::env::var("SCHEDFORM_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    // ── Oracle ───────────────────────────────────────────────────────────
    let backend = match std::env::var("SCHEDFORM_ORACLE_BACKEND").as_deref() {
        Ok("openai") => OracleBackend::OpenAi,
        _ => OracleBackend::Anthropic,
    };
    let key_var = match backend {
        OracleBackend::Anthropic => "ANTHROPIC_API_KEY",
        OracleBackend::OpenAi => "OPENAI_API_KEY",
    };
    let api_key = std::env::var(key_var).unwrap_or_else(|_| {
        eprintln!("Error: {key_var} not set");
        std::process::exit(1);
    });
    let model = std::env::var("SCHEDFORM_ORACLE_MODEL")
        .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());

    let oracle = create_oracle(&OracleConfig {
        backend,
        api_key: secrecy::SecretString::from(api_key),
        model: model.clone(),
    })?;

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("SCHEDFORM_DB_PATH").unwrap_or_else(|_| "./data/schedform.db".to_string());
    let store: Arc<dyn FlowStore> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );

    eprintln!("📅 SchedForm v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {model}");
    eprintln!("   Database: {db_path}");
    eprintln!("   API: http://0.0.0.0:{port}/api/flows");
    eprintln!("   WS:  ws://0.0.0.0:{port}/ws");

    // ── Engine & collaborators ──────────────────────────────────────────
    let engine_config = EngineConfig::from_env();
    let bus = NotificationBus::new();
    let engine = Arc::new(FlowEngine::new(Arc::clone(&store), bus.clone()));
    let gateway = Arc::new(QualificationGateway::new(
        Arc::clone(&engine),
        Arc::clone(&oracle),
        engine_config.clone(),
    ));
    let dispatcher = Arc::new(SchedulingDispatcher::new(
        Arc::clone(&engine),
        Arc::clone(&oracle),
        engine_config,
    ));

    // ── Notification sinks ──────────────────────────────────────────────
    if let Some(webhook_config) = WebhookConfig::from_env() {
        eprintln!("   Webhooks: {} endpoint(s)", webhook_config.urls.len());
        let _webhook_handle = schedform::notify::spawn_webhook_sink(&bus, webhook_config);
    }
    if let Some(email_config) = RecoveryEmailConfig::from_env() {
        eprintln!("   Recovery email: {}", email_config.from_address);
        let _email_handle = schedform::notify::spawn_recovery_email_sink(&bus, email_config);
    }

    // ── Startup report ──────────────────────────────────────────────────
    {
        let active = store.list_active_flows().await.unwrap_or_default();
        let review = store.list_review_queue().await.unwrap_or_default();
        if !active.is_empty() {
            eprintln!("   Active flows: {}", active.len());
        }
        if !review.is_empty() {
            eprintln!("   Awaiting manual review: {}", review.len());
        }
    }

    // ── Abandonment reaper ──────────────────────────────────────────────
    let reaper_config = ReaperConfig::from_env();
    eprintln!("   Reaper: {}", reaper_config.schedule);
    let reaper = AbandonmentReaper::new(Arc::clone(&engine), reaper_config);
    let _reaper_handle = spawn_reaper_task(reaper);

    // ── API server ──────────────────────────────────────────────────────
    let app = flow_routes(engine, gateway, dispatcher, bus);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "SchedForm API server started");
    axum::serve(listener, app).await?;

    Ok(())
}
