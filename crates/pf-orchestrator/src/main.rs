//! Procfleet orchestrator daemon
//!
//! Loads the daemon configuration and entity definitions, then runs the core
//! loop with its two connection pools until SIGINT/SIGTERM.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pf_core::config::{load_config, CoreConfig};
use pf_core::jsonload::load_json_dir;
use pf_core::logging::LogSink;
use pf_core::Registry;
use pf_orchestrator::{Core, CoreEvent, OutboundPool, ViewerPool};

/// Core loop event queue depth
const EVENT_QUEUE: usize = 256;

#[derive(Parser)]
#[command(name = "pf-orchestrator")]
#[command(about = "procfleet orchestration daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Viewer bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "PF_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => CoreConfig::default(),
    };

    init_logging(&args.log_level, &config)?;
    tracing::info!("procfleet orchestrator starting");

    let registry = load_registry(&config);

    let bind_addr = args.bind.unwrap_or_else(|| config.gui_address.clone());
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind viewer listener on {bind_addr}"))?;
    tracing::info!(%bind_addr, "listening for viewers");

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let (events_tx, events_rx) = mpsc::channel::<CoreEvent>(EVENT_QUEUE);

    let outbound = OutboundPool::start(
        &registry,
        config.reconnect_interval,
        events_tx.clone(),
        cancel.clone(),
    );

    let viewers = ViewerPool::new();
    tokio::spawn(
        viewers
            .clone()
            .run(listener, events_tx.clone(), cancel.clone()),
    );

    let core = Core::new(
        registry,
        outbound,
        viewers,
        events_tx,
        config.process_retention,
    );
    core.run(events_rx, cancel).await;

    tracing::info!("orchestrator shutdown complete");
    Ok(())
}

fn init_logging(log_level: &str, config: &CoreConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()),
    );

    let file_layer = match &config.log_file {
        Some(path) => {
            let sink = LogSink::open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(sink),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

/// Load all entity definitions; bad files and bad references are logged and
/// skipped, the valid subset runs
fn load_registry(config: &CoreConfig) -> Registry {
    let (nodes, failures) = load_json_dir(&config.node_path);
    log_load_failures("node", &failures);
    let (clusters, failures) = load_json_dir(&config.cluster_path);
    log_load_failures("cluster", &failures);
    let (programs, failures) = load_json_dir(&config.program_path);
    log_load_failures("program", &failures);

    let (registry, report) = Registry::load(nodes, clusters, programs);
    for failure in &report.failures {
        tracing::error!(error = %failure, "definition rejected");
    }
    tracing::info!(
        nodes = registry.nodes().len(),
        clusters = registry.clusters().len(),
        programs = registry.programs().len(),
        data_hash = registry.data_hash(),
        "registry loaded"
    );
    registry
}

fn log_load_failures(kind: &str, failures: &[pf_core::LoadError]) {
    for failure in failures {
        tracing::error!(kind, error = %failure, "definition file failed to load");
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received ctrl-c, shutting down");
            }
            _ = terminate => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        cancel.cancel();
    });
}
