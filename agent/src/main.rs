//! civicsync agent
//!
//! Keeps one remote collection in sync on a host without a UI:
//! 1. Fetches it over HTTP, with a timeout, whenever asked or on a schedule
//! 2. Follows its push feed when one is configured
//! 3. Serves the last known copy from SQLite when the network is gone
//!
//! Usage:
//!   civicsync-agent --name jobs --endpoint https://example.org/api/jobs --poll-secs 300
//!
//! State is exposed on `/api/v1/status`, `/api/v1/snapshot` and
//! `/api/v1/refresh`.

use anyhow::{Context, Result};
use civicsync_agent::{build_router, probe};
use civicsync_storage::{SqliteRecordStore, StoreConfig, DEFAULT_CAPACITY};
use civicsync_sync::{
    ConnectivityMonitor, FixedDelay, LogNotifier, ResourceDescriptor, ResourceSync, SyncConfig,
    SyncCoordinator, TimedFetcher, WsConnector,
};
use clap::Parser;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "civicsync-agent")]
#[command(about = "Offline-first sync agent for one civicsync resource")]
struct Args {
    /// Resource name (also the store table suffix)
    #[arg(long)]
    name: String,

    /// Label used in notifications
    #[arg(long)]
    label: Option<String>,

    /// HTTP(S) endpoint returning the collection
    #[arg(long)]
    endpoint: String,

    /// WebSocket URL of the push feed
    #[arg(long)]
    push_url: Option<String>,

    /// Fetch timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Background refresh interval in seconds
    #[arg(long)]
    poll_secs: Option<u64>,

    /// SQLite database path
    #[arg(long, default_value = "civicsync.db")]
    db: PathBuf,

    /// Maximum number of cached records
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,

    /// Payload field shown in new-item notifications
    #[arg(long)]
    notify_field: Option<String>,

    /// Seconds between reachability probes
    #[arg(long, default_value = "15")]
    probe_secs: u64,

    /// HTTP API port
    #[arg(long, default_value = "4080")]
    http_port: u16,

    /// Do not show notifications
    #[arg(long)]
    deny_notifications: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            name: self.name.clone(),
            label: self.label.clone(),
            endpoint: self.endpoint.clone(),
            timeout_ms: self.timeout_ms,
            push_url: self.push_url.clone(),
            poll_interval_ms: self.poll_secs.map(|s| s.saturating_mul(1_000)),
            notify_field: self.notify_field.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let descriptor = args.descriptor();
    descriptor.validate().context("invalid resource configuration")?;
    let config = SyncConfig::default();
    info!(resource = %descriptor.name, endpoint = %descriptor.endpoint, "civicsync agent starting");

    let monitor = ConnectivityMonitor::new();
    let (host, port) = probe::probe_target(&descriptor)?;
    let probe_interval = Duration::from_secs(args.probe_secs.max(1));
    let initial = probe::probe_and_signal(
        &monitor,
        &host,
        port,
        probe_interval.min(Duration::from_secs(5)),
    )
    .await;
    info!(%host, port, state = ?initial, "initial reachability");
    let prober = probe::spawn_probe(monitor.clone(), host, port, probe_interval);

    let store_config = StoreConfig {
        capacity: args.capacity,
        ..Default::default()
    };
    let store = SqliteRecordStore::open(&args.db, &descriptor.name, store_config)
        .with_context(|| format!("failed to open store at {}", args.db.display()))?;
    let fetcher = TimedFetcher::http().context("failed to create HTTP client")?;
    let notifier = LogNotifier::new(!args.deny_notifications);

    let coordinator = Arc::new(SyncCoordinator::new(
        descriptor,
        config.clone(),
        monitor,
        Arc::new(store),
        fetcher,
        Arc::new(notifier),
    )?);

    let sync = ResourceSync::new(Arc::clone(&coordinator)).with_push(
        Arc::new(WsConnector),
        Arc::new(FixedDelay(config.reconnect_delay())),
    );
    sync.start();

    if let Err(e) = coordinator.refresh().await {
        warn!("initial refresh failed: {e}");
    }

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.http_port))
        .await
        .with_context(|| format!("failed to bind HTTP port {}", args.http_port))?;
    info!("HTTP API listening on port {}", args.http_port);

    let app = build_router(Arc::clone(&coordinator));
    tokio::select! {
        served = axum::serve(listener, app) => served.context("HTTP server failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    sync.shutdown().await;
    prober.abort();
    Ok(())
}
