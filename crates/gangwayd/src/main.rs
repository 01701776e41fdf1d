//! gangwayd — the Gangway daemon.
//!
//! Single binary that assembles the gang-scheduling control plane:
//! - State store (redb)
//! - Group registry + resource inventory
//! - Scheduler loop (the single scheduling authority)
//! - Cluster membership + dead node sweeper
//! - REST API
//!
//! # Usage
//!
//! ```text
//! gangwayd standalone --port 8443 --data-dir /var/lib/gangway
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use gangway_cluster::{LoggingCapacityProvider, LoggingNodeAgent, MembershipManager};
use gangway_inventory::Inventory;
use gangway_registry::Registry;
use gangway_scheduler::{Event, Scheduler, SchedulerConfig};

/// Buffered events before API handlers start blocking.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "gangwayd", about = "Gangway daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (API and scheduler in one process).
    Standalone {
        /// Port to listen on.
        #[arg(long, default_value = "8443")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/gangway")]
        data_dir: PathBuf,

        /// Scheduler wake-up interval in seconds when no events arrive.
        #[arg(long, default_value = "10")]
        tick_interval: u64,

        /// Seconds without a heartbeat before a node counts as dead.
        #[arg(long, default_value = "30")]
        dead_node_timeout: u64,

        /// Dead node sweep interval in seconds.
        #[arg(long, default_value = "10")]
        reap_interval: u64,

        /// Evict lower-priority running groups to admit starved ones.
        #[arg(long)]
        enable_preemption: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gangwayd=debug,gangway=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            tick_interval,
            dead_node_timeout,
            reap_interval,
            enable_preemption,
        } => {
            run_standalone(
                port,
                data_dir,
                tick_interval,
                dead_node_timeout,
                reap_interval,
                enable_preemption,
            )
            .await
        }
    }
}

async fn run_standalone(
    port: u16,
    data_dir: PathBuf,
    tick_interval: u64,
    dead_node_timeout: u64,
    reap_interval: u64,
    enable_preemption: bool,
) -> anyhow::Result<()> {
    info!("Gangway daemon starting in standalone mode");

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("gangway.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = gangway_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let registry = Registry::new(store.clone());
    let inventory = Inventory::new();

    let membership = Arc::new(
        MembershipManager::new(store.clone())
            .with_dead_timeout(Duration::from_secs(dead_node_timeout)),
    );

    let config = SchedulerConfig {
        tick_interval: Duration::from_secs(tick_interval),
        enable_preemption,
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(
        store.clone(),
        registry.clone(),
        inventory.clone(),
        Arc::new(LoggingCapacityProvider),
        Arc::new(LoggingNodeAgent),
        config,
    );
    let recovered = scheduler.recover()?;
    info!(groups = recovered, "scheduler initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scheduler_shutdown = shutdown_rx.clone();
    let mut reaper_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    // Scheduler loop.
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(&mut event_rx, &mut scheduler_shutdown).await;
    });

    // Dead node sweeper: reaped nodes become NodeLost events so the
    // scheduler evicts their groups.
    let reaper_membership = membership.clone();
    let reaper_events = event_tx.clone();
    let reaper_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(reap_interval));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match reaper_membership.reap_dead_nodes() {
                        Ok(reaped) => {
                            for node_id in reaped {
                                if reaper_events
                                    .send(Event::NodeLost { node_id })
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "dead node sweep failed"),
                    }
                }
                _ = reaper_shutdown.changed() => return,
            }
        }
    });

    // ── Start API server ───────────────────────────────────────

    let router = gangway_api::build_router(gangway_api::ApiState {
        store,
        registry,
        inventory,
        membership,
        events: event_tx,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = scheduler_handle.await;
    let _ = reaper_handle.await;

    info!("Gangway daemon stopped");
    Ok(())
}
