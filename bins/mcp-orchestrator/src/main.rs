use anyhow::{Context, Result};
use clap::Parser;
use mcp_orchestration::{
    scheduler, EventBus, OrchestrationCommand, Orchestrator, OrchestratorConfig, RetryPolicy,
    TaskQueue,
};
use mcp_registry::{MemoryStore, ProcessStatus, RecordStore};
use std::sync::Arc;
use tracing::{error, info, warn};

/// MCP server process orchestrator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Run duration in seconds (for testing)
    #[arg(long)]
    run_duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = OrchestratorConfig::load_from_file(&args.config)?;
    initialize_logging(args.debug, &config.orchestrator.log_level)?;

    info!("starting mcp-orchestrator");
    info!(
        config = %args.config,
        connections = config.connections.len(),
        "configuration loaded"
    );

    // Composition root: every component is constructed here and passed
    // explicitly; nothing reaches for globals.
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let events = EventBus::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        events.clone(),
        config.connections.clone(),
    );

    let policy = RetryPolicy {
        max_attempts: config.orchestrator.retry.max_attempts,
        backoff: config.orchestrator.retry.backoff.clone(),
    };
    let queue = TaskQueue::start(
        Arc::new(orchestrator.clone()),
        policy,
        config.orchestrator.queue_workers,
        events.clone(),
    );

    let health_scheduler = scheduler::spawn_health_scheduler(
        queue.clone(),
        Arc::clone(&store),
        config.orchestrator.health_tick,
    );
    let crash_restarter =
        scheduler::spawn_crash_restarter(queue.clone(), events.clone(), &config.connections);

    // Autostart configured connections through the queue so transient spawn
    // failures get the retry schedule.
    for connection in config.connections.iter().filter(|c| c.autostart) {
        match queue.enqueue(OrchestrationCommand::start(connection.name.as_str(), None)) {
            Ok(handle) => info!(process = %connection.name, task = handle.id, "autostart enqueued"),
            Err(e) => error!(process = %connection.name, error = %e, "autostart enqueue failed"),
        }
    }

    // Wait for a shutdown signal (or the test-mode run duration).
    if let Some(duration) = args.run_duration {
        info!(seconds = duration, "running for fixed duration (test mode)");
        tokio::time::sleep(tokio::time::Duration::from_secs(duration)).await;
    } else {
        wait_for_shutdown_signal().await;
    }

    info!("shutting down");
    health_scheduler.abort();
    crash_restarter.abort();

    shutdown_all(&orchestrator, config.orchestrator.shutdown_timeout).await;
    info!("shutdown complete");
    Ok(())
}

/// Stop every non-stopped process, bounded by the configured timeout.
async fn shutdown_all(orchestrator: &Orchestrator, timeout: std::time::Duration) {
    let stops = async {
        for record in orchestrator.list_processes() {
            if record.status == ProcessStatus::Stopped {
                continue;
            }
            if let Err(e) = orchestrator.stop_process(&record.name, false).await {
                warn!(process = %record.name, error = %e, "failed to stop during shutdown");
            }
        }
    };

    if tokio::time::timeout(timeout, stops).await.is_err() {
        warn!(?timeout, "shutdown timed out with processes still stopping");
    }
}

fn initialize_logging(debug: bool, configured_level: &str) -> Result<()> {
    let level = if debug { "debug" } else { configured_level };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))
        .context("logging setup")
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        let _ = signal::ctrl_c().await;
        info!("received ctrl-c");
    }
}
