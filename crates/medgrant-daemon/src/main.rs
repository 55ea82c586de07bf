//! medgrant-daemon binary.
//!
//! Runs the expiration sweeper against the configured approval store:
//! either as a long-lived daemon on the configured interval, or as a
//! one-shot sweep (`--sweep-once`) for operational cleanup. The inbound
//! lifecycle operations are mounted by the embedding transport service,
//! which wires the directory and ledger collaborators; this binary only
//! enforces time-bound validity.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use medgrant_core::clock::{Clock, SystemClock};
use medgrant_core::config::EngineConfig;
use medgrant_core::store::ApprovalStore;
use medgrant_core::sweep::ExpirationSweeper;
use medgrant_daemon::state::DaemonState;
use medgrant_daemon::sweeper;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "medgrant-daemon", about = "Approval expiration sweeper daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "medgrant.toml")]
    config: PathBuf,

    /// Run a single sweep, print the report as JSON, and exit.
    #[arg(long)]
    sweep_once: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        EngineConfig::from_file(&args.config)
            .with_context(|| format!("loading config from {}", args.config.display()))?
    } else {
        info!(config = %args.config.display(), "config file not found, using defaults");
        EngineConfig::default()
    };

    let store = Arc::new(
        ApprovalStore::open(&config.db_path)
            .with_context(|| format!("opening approval store at {}", config.db_path.display()))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if args.sweep_once {
        let report = ExpirationSweeper::new(Arc::clone(&store))
            .run_once(clock.now_ms())
            .context("running manual sweep")?;
        info!(
            revoked_count = report.revoked_count(),
            "manual sweep completed"
        );
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let state = DaemonState::new();
    let handle = sweeper::spawn_sweeper(
        Arc::clone(&state),
        store,
        None,
        clock,
        Duration::from_secs(config.sweep_interval_secs),
        config.collaborator_timeout_ms,
    );

    info!(
        db_path = %config.db_path.display(),
        sweep_interval_secs = config.sweep_interval_secs,
        "medgrant daemon started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    state.request_shutdown();
    handle.abort();

    Ok(())
}
