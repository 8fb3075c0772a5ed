//! confgated — the Confgate daemon.
//!
//! Single binary that assembles the readiness gateway:
//! - Configuration store (redb)
//! - Change distributor (debounced readiness fan-out)
//! - Fetch tracker
//! - REST API
//!
//! # Usage
//!
//! ```text
//! confgated serve --port 9000 --data-dir /var/lib/confgate
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use confgate_api::{ApiState, build_router};
use confgate_distributor::{ChangeDistributor, DistributorConfig, FetchTracker};
use confgate_state::{ConfigStore, RedbStore};

#[derive(Parser)]
#[command(name = "confgated", about = "Confgate daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the readiness gateway.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "9000")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/confgate")]
        data_dir: PathBuf,

        /// Quiet window in milliseconds before changes are recomputed.
        #[arg(long, default_value = "300")]
        debounce_window_ms: u64,

        /// Upper bound in milliseconds a change burst may defer recomputation.
        #[arg(long, default_value = "2000")]
        debounce_cap_ms: u64,

        /// Base URL clients reach this gateway on, used in self links.
        /// Defaults to http://localhost:<port>.
        #[arg(long)]
        base_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,confgated=debug,confgate=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            debounce_window_ms,
            debounce_cap_ms,
            base_url,
        } => {
            serve(
                port,
                data_dir,
                debounce_window_ms,
                debounce_cap_ms,
                base_url,
            )
            .await
        }
    }
}

async fn serve(
    port: u16,
    data_dir: PathBuf,
    debounce_window_ms: u64,
    debounce_cap_ms: u64,
    base_url: Option<String>,
) -> anyhow::Result<()> {
    info!("Confgate daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("confgate.redb");

    // ── Initialize subsystems ──────────────────────────────────

    // Configuration store.
    let store: Arc<dyn ConfigStore> = Arc::new(RedbStore::open(&db_path)?);
    info!(path = ?db_path, "configuration store opened");

    // Change distributor.
    let distributor_config = DistributorConfig {
        debounce_window: Duration::from_millis(debounce_window_ms),
        debounce_cap: Duration::from_millis(debounce_cap_ms),
        ..DistributorConfig::default()
    };
    let (distributor, handle) = ChangeDistributor::new(store.clone(), distributor_config);
    info!(
        window_ms = debounce_window_ms,
        cap_ms = debounce_cap_ms,
        version = handle.current_snapshot().version,
        "change distributor initialized"
    );

    // Fetch tracker.
    let tracker = FetchTracker::new(store.clone(), handle.clone());

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start the distributor loop ─────────────────────────────

    let distributor_task = tokio::spawn(async move {
        distributor.run(shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let base_url = base_url.unwrap_or_else(|| format!("http://localhost:{port}"));
    let state = ApiState {
        store,
        distributor: handle,
        tracker,
        base_url,
    };
    let router = build_router(state);
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

    // Wait for the distributor to drain.
    let _ = distributor_task.await;

    info!("Confgate daemon stopped");
    Ok(())
}
