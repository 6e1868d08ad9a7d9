use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use email_ops::api::{self, AppState};
use email_ops::automation::{ActionRegistry, LlmClassifier, Orchestrator};
use email_ops::config::AppConfig;
use email_ops::llm::{LlmConfig, create_provider};
use email_ops::pipeline::EmailProcessor;
use email_ops::store::{Database, LibSqlBackend};
use email_ops::worker::{AutomationQueue, WorkerDeps, spawn_workers};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    // Stderr always; a daily rolling file as well when a log dir is set.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "email-ops.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(env_filter()),
        )
        .with(file_layer.with_filter(env_filter()))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), model = %config.model, "Email Ops starting");

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    // ── Automation ───────────────────────────────────────────────────────
    let llm = create_provider(&LlmConfig::from(&config))?;
    let registry = Arc::new(ActionRegistry::standard(store.clone(), llm.clone()));
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), llm.clone(), registry));
    let processor = Arc::new(EmailProcessor::new(
        store.clone(),
        Arc::new(LlmClassifier::new(llm)),
    ));

    let (queue, rx) = AutomationQueue::new(config.worker.queue_capacity);
    let _workers = spawn_workers(
        config.worker.workers,
        &queue,
        rx,
        WorkerDeps {
            processor,
            orchestrator: orchestrator.clone(),
        },
    );

    // ── Admin API ────────────────────────────────────────────────────────
    let app = api::router(AppState {
        store,
        orchestrator,
        queue,
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, workers = config.worker.workers, "Admin API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
