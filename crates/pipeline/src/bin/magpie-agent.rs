//! magpie-agent — runs one pipeline sweep against the configured stores.
//!
//! Wires the stores, the in-process event broker (ingestor + stats server
//! included), and the reference ports, then executes a run described by the
//! CLI flags. Ctrl-C cancels the run at the next suspension point.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use magpie_core::config::{load_dotenv, Config};
use magpie_core::run::{RunDescriptor, RunMode, RunPreferences};
use magpie_events::http::spawn_stats_server;
use magpie_events::{Broker, EventEmitter, EventIngestor, InProcessBroker, SubscriberHub};
use magpie_kb::KbRenderer;
use magpie_pipeline::{Orchestrator, Ports, Stores};
use magpie_ports::{FsMediaStore, GitPublisher, JsonExportFetcher, OllamaClient};
use magpie_store::db::Db;

// ── CLI ─────────────────────────────────────────────────────────────

/// Bookmark-to-knowledge-base pipeline agent.
#[derive(Parser, Debug)]
#[command(name = "magpie-agent", version, about)]
struct Cli {
    /// Run mode: full, phase-only, or reprocess.
    #[arg(long, env = "MAGPIE_RUN_MODE", default_value = "full")]
    run_mode: String,

    /// Comma-separated phase names for phase-only runs.
    #[arg(long, env = "MAGPIE_PHASES", default_value = "")]
    phases: String,

    /// Reset all pipeline flags before processing.
    #[arg(long, env = "MAGPIE_FORCE_REPROCESS", default_value_t = false)]
    force_reprocess: bool,

    /// Also rebuild caches (refetch payloads and media).
    #[arg(long, env = "MAGPIE_FORCE_RECACHE", default_value_t = false)]
    force_recache: bool,

    /// Skip pulling new bookmarks; only drain the existing queue.
    #[arg(long, env = "MAGPIE_SKIP_FETCH", default_value_t = false)]
    skip_fetch: bool,

    /// Bookmark export file consumed by the fetcher port.
    #[arg(long, env = "MAGPIE_BOOKMARKS_FILE", default_value = "bookmarks.json")]
    bookmarks: String,
}

fn preferences(cli: &Cli) -> RunPreferences {
    let run_mode = match cli.run_mode.as_str() {
        "phase-only" | "phase_only" => RunMode::PhaseOnly,
        "reprocess" => RunMode::Reprocess,
        _ => RunMode::Full,
    };
    RunPreferences {
        run_mode,
        enabled_phases: cli
            .phases
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        force_reprocess_pipeline: cli.force_reprocess || run_mode == RunMode::Reprocess,
        force_recache: cli.force_recache,
        skip_fetch: cli.skip_fetch,
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    // Stores
    let db = Db::connect(&config.database).await?;
    let stores = Stores::new(db);

    // Event bus: broker, producer, ingestor, fan-out surface
    let broker = InProcessBroker::new();
    let emitter = Arc::new(EventEmitter::new(
        broker.clone() as Arc<dyn Broker>,
        &config.event_bus,
    ));
    let hub = Arc::new(SubscriberHub::new());
    let ingestor = EventIngestor::spawn(
        broker.clone() as Arc<dyn Broker>,
        hub.clone(),
        config.event_bus.clone(),
    )
    .await;
    let (http_shutdown_tx, http_shutdown_rx) = watch::channel(false);
    let http_server = (config.event_bus.stats_port > 0).then(|| {
        spawn_stats_server(
            config.event_bus.stats_port,
            hub.clone(),
            ingestor.stats().clone(),
            http_shutdown_rx,
        )
    });

    // Ports
    let ollama = Arc::new(OllamaClient::new(&config.ollama));
    let ports = Ports {
        fetcher: Arc::new(JsonExportFetcher::new(&cli.bookmarks)),
        media: Arc::new(FsMediaStore::new(&config.paths.media_cache_dir)),
        vision: ollama.clone(),
        llm: ollama,
        renderer: Arc::new(KbRenderer::new()),
        publisher: Arc::new(GitPublisher::new(
            &config.paths.knowledge_base_dir,
            &config.publisher,
        )),
    };

    // Cancellation: Ctrl-C flips the cancel signal observed between
    // sub-phases and at suspension points.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancel requested");
            let _ = cancel_tx.send(true);
        }
    });

    let descriptor = RunDescriptor::new(preferences(&cli));
    info!(task_id = %descriptor.task_id, "accepted run");

    let orchestrator = Orchestrator::new(config, stores, ports, emitter);
    let summary = orchestrator.run(descriptor, cancel_rx).await?;

    info!(
        processed = summary.processed,
        success = summary.success,
        error = summary.error,
        skipped = summary.skipped,
        status = summary.status.as_str(),
        "sweep complete"
    );

    let _ = http_shutdown_tx.send(true);
    if let Some(server) = http_server {
        let _ = server.await;
    }
    ingestor.stop().await;
    Ok(())
}
