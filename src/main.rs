use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ytdl_queue::config::{Config, JobConfig};
use ytdl_queue::extractor::ytdlp::provision_cookies;
use ytdl_queue::extractor::YtDlpExtractor;
use ytdl_queue::jobs::{CancelRegistry, JobScheduler, JobStore, PendingQueue, WorkerPool};
use ytdl_queue::web::WebServer;

#[derive(Parser)]
#[command(name = "ytdl-queue")]
#[command(version)]
#[command(about = "Download-job service resolving media streams through yt-dlp")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Number of extraction workers
    #[arg(short = 'w', long, value_name = "COUNT")]
    workers: Option<usize>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("ytdl_queue={},tower_http=trace", cli.log_level)
    } else {
        format!("ytdl_queue={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ytdl-queue v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(workers) = cli.workers {
        config.workers.count = workers;
    }

    let cookies_file = provision_cookies(&config.extractor);
    let extractor = Arc::new(YtDlpExtractor::new(&config.extractor, cookies_file));
    if config.extractor.no_update {
        info!("extractor self-update disabled");
    } else if let Err(e) = extractor.self_update().await {
        warn!(error = %e, "self-update failed, continuing with the installed version");
    }

    let store = JobStore::new();
    let queue = Arc::new(PendingQueue::new());
    let cancellations = CancelRegistry::new();
    let scheduler = JobScheduler::new(
        store.clone(),
        queue.clone(),
        cancellations.clone(),
        config.jobs.clone(),
    );
    let pool = WorkerPool::new(
        store.clone(),
        queue,
        cancellations,
        extractor,
        config.workers.clone(),
        config.extractor.timeout(),
    );
    pool.spawn_workers();

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());
    spawn_retention_sweeper(store, config.jobs.clone(), shutdown.clone());

    let web_server = WebServer::new(&config, scheduler)?;
    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );
    web_server.serve(shutdown).await?;

    let report = pool.drain().await;
    if !report.clean {
        anyhow::bail!(
            "worker pool failed to drain within the grace period ({} extraction(s) killed)",
            report.aborted
        );
    }
    info!("shutdown complete");
    Ok(())
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        shutdown.cancel();
    });
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => info!("Received SIGINT (Ctrl+C), shutting down gracefully"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("Received Ctrl+C, shutting down gracefully");
    }
}

/// Periodically drop terminal jobs past retention so the in-memory store
/// does not grow without bound.
fn spawn_retention_sweeper(store: JobStore, config: JobConfig, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(config.sweep_interval());
        // The first tick fires immediately; skip it.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let removed = store.cleanup_finished(config.retention()).await;
                    if removed > 0 {
                        debug!(removed, "swept finished jobs past retention");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}
