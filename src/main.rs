use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use class_scribe::channels::{Channel, CliChannel};
use class_scribe::config::{Config, LoggingConfig};
use class_scribe::delivery::{
    CalendarTarget, DeliveryTarget, GoogleCalendarClient, GoogleTasksClient, TaskTarget,
    UnconfiguredTarget,
};
use class_scribe::llm::{LlmConfig, create_provider};
use class_scribe::pipeline::{Dependencies, Orchestrator, run_command};
use class_scribe::store::{Database, DeliveryKind, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = Config::from_env().context("Invalid configuration")?;
    let _log_guard = init_tracing(&config.logging)?;

    eprintln!("📚 Class Scribe v{}", env!("CARGO_PKG_VERSION"));

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = &config.storage.db_path;
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
    );
    eprintln!("   Database: {}", db_path.display());

    // ── Language model ──────────────────────────────────────────────────
    let model = match (&config.llm.api_key, config.llm.enabled) {
        (Some(api_key), true) => {
            let llm_config = LlmConfig {
                backend: config.llm.backend,
                api_key: api_key.clone(),
                model: config.llm.model.clone(),
            };
            eprintln!("   Model: {}", llm_config.model);
            Some(create_provider(&llm_config)?)
        }
        (None, true) => {
            tracing::warn!("No LLM API key set; using pattern extraction only");
            None
        }
        (_, false) => None,
    };

    // ── Google services ─────────────────────────────────────────────────
    let google = &config.google;
    let (calendar, tasks): (Arc<dyn DeliveryTarget>, Arc<dyn DeliveryTarget>) =
        match &google.access_token {
            Some(token) => {
                let calendar_client = GoogleCalendarClient::new(
                    token.clone(),
                    google.calendar_id.clone(),
                    google.request_timeout,
                );
                let tasks_client = GoogleTasksClient::new(
                    token.clone(),
                    google.task_list_id.clone(),
                    google.request_timeout,
                );
                eprintln!("   Calendar: {}", google.calendar_id);
                eprintln!("   Task list: {}", google.task_list_id);
                (
                    Arc::new(CalendarTarget::new(
                        Arc::new(calendar_client),
                        google.timezone.clone(),
                    )),
                    Arc::new(TaskTarget::new(Arc::new(tasks_client))),
                )
            }
            None => {
                tracing::warn!("GOOGLE_ACCESS_TOKEN not set; deliveries will be dead-lettered");
                (
                    Arc::new(UnconfiguredTarget::new(DeliveryKind::Calendar, "calendar")),
                    Arc::new(UnconfiguredTarget::new(DeliveryKind::Task, "tasks")),
                )
            }
        };

    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        Dependencies {
            db,
            model,
            calendar,
            tasks,
        },
    ));

    eprintln!("   Type a message and press Enter. /help for commands, /quit to exit.\n");

    // ── Message loop ────────────────────────────────────────────────────
    let channel = Arc::new(CliChannel::new());
    let mut messages = channel.start().await?;

    while let Some(msg) = messages.next().await {
        let text = msg.text.trim();
        if text == "/quit" || text == "/exit" {
            break;
        }

        if text.starts_with('/') {
            let reply = run_command(&orchestrator, text).await;
            if let Err(e) = channel.respond(&msg, &reply).await {
                tracing::error!("Failed to send reply: {}", e);
            }
            continue;
        }

        let orchestrator = Arc::clone(&orchestrator);
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            let reply = match orchestrator.handle(&msg).await {
                Ok(outcome) => outcome.reply(),
                Err(e) => {
                    tracing::error!(key = %msg.key(), "Message handling failed: {}", e);
                    None
                }
            };
            let Some(reply) = reply else { return };
            if let Err(e) = channel.respond(&msg, &reply).await {
                tracing::error!("Failed to send reply: {}", e);
            }
        });
    }

    eprintln!("Goodbye.");
    Ok(())
}

/// Console logging on stderr, plus a daily-rolling file when a log
/// directory is configured. The guard must live until exit.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&logging.filter)
        .with_context(|| format!("Invalid log filter {:?}", logging.filter))?;

    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file, guard) = match &logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "class-scribe.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    Ok(guard)
}
