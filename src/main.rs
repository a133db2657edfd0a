//! FileGuard - file integrity monitor daemon.
//!
//! # Commands
//!
//! - `fileguard run`: Scan the monitored roots, then watch them for changes
//! - `fileguard scan`: Run a single reconciliation scan and exit
//! - `fileguard check <filename>`: Resolve one file by name and reconcile it
//!
//! # Environment Variables
//!
//! See the [`fileguard::config`] module for available configuration options.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fileguard::config::Config;
use fileguard::ledger::HashLedger;
use fileguard::notifier::Notifier;
use fileguard::reconciler::Reconciler;
use fileguard::resolver::PathResolver;
use fileguard::scanner::run_scan;
use fileguard::watcher::{FsEvent, FsWatcher};

/// FileGuard - file integrity monitor.
///
/// Maintains a content-hash ledger for every file under the monitored roots
/// and raises notifications when files are created, modified, deleted, or
/// moved.
#[derive(Parser, Debug)]
#[command(name = "fileguard")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    FILEGUARD_ROOTS             Comma-separated directories to monitor (required)
    FILEGUARD_DB_PATH           Ledger database path (default: file_integrity.db)
    FILEGUARD_WEBHOOK_URL       Notification webhook (default: log only)
    FILEGUARD_CHANNEL_CAPACITY  Watch-event channel capacity (default: 1024)

EXAMPLES:
    # Monitor two directory trees
    export FILEGUARD_ROOTS=/etc/app,/srv/data
    fileguard run

    # One-shot reconciliation, e.g. after downtime
    fileguard scan

    # Check a single file by name across all roots
    fileguard check app.conf
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the monitor daemon.
    ///
    /// Runs a startup reconciliation scan, then watches the monitored roots
    /// and processes filesystem events until interrupted.
    Run,

    /// Run a single reconciliation scan and exit.
    ///
    /// Repairs ledger drift (e.g. events missed while the daemon was down)
    /// without starting the watcher.
    Scan,

    /// Check a single file by name and reconcile it.
    ///
    /// Resolves the name across all monitored roots (direct children first,
    /// then recursively), hashes the match, and reports its ledger state.
    Check {
        /// File name to look up; path components are stripped.
        filename: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    match cli.command {
        Command::Run => runtime.block_on(run_monitor()),
        Command::Scan => runtime.block_on(run_scan_once()),
        Command::Check { filename } => runtime.block_on(run_check(&filename)),
    }
}

/// Builds the engine components shared by both commands.
async fn build_engine(config: &Config) -> Result<Reconciler> {
    let resolver = Arc::new(
        PathResolver::new(&config.roots)
            .context("No valid monitored roots; check FILEGUARD_ROOTS")?,
    );

    info!(
        roots = ?resolver.roots(),
        db_path = %config.db_path.display(),
        webhook = config.webhook_url.is_some(),
        "Configuration loaded"
    );

    let ledger = HashLedger::open(&config.db_path)
        .await
        .with_context(|| format!("Failed to open ledger at {}", config.db_path.display()))?;

    let notifier = Arc::new(Notifier::new(config.webhook_url.clone(), Arc::clone(&resolver)));

    Ok(Reconciler::new(ledger, resolver, notifier))
}

/// Runs the monitor daemon.
async fn run_monitor() -> Result<()> {
    init_logging();

    info!("Starting FileGuard");

    let config = Config::from_env().context("Failed to load configuration")?;
    let reconciler = build_engine(&config).await?;

    // Subscribe before scanning so nothing slips between the scan and the
    // first event; the channel buffers whatever arrives mid-scan and the
    // atomic reconcile absorbs the overlap.
    let (watch_tx, mut watch_rx) = mpsc::channel::<FsEvent>(config.channel_capacity);
    let watcher = FsWatcher::new(reconciler.resolver().roots(), watch_tx)
        .context("Failed to initialize filesystem watcher")?;

    info!(roots = ?watcher.roots(), "Filesystem watcher initialized");

    match run_scan(&reconciler).await {
        Ok(summary) => {
            info!(
                files_seen = summary.files_seen,
                created = summary.created,
                modified = summary.modified,
                removed = summary.removed,
                skipped = summary.skipped,
                "Startup scan complete"
            );
        }
        Err(e) => {
            // The ledger stays usable for live events; the next scan repairs
            // whatever the sweep missed.
            error!(error = %e, "Startup scan failed");
        }
    }

    info!("Monitor running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = wait_for_shutdown() => {
                info!("Shutdown signal received");
                break;
            }

            event = watch_rx.recv() => {
                match event {
                    Some(event) => reconciler.handle_event(event).await,
                    None => {
                        error!("Watch event channel closed unexpectedly");
                        break;
                    }
                }
            }
        }
    }

    // Dropping the watcher tears down the subscription; any reconciliation
    // already in flight has finished by this point because events are
    // processed to completion above.
    drop(watcher);

    info!("Monitor stopped");
    Ok(())
}

/// Runs a one-shot reconciliation scan.
async fn run_scan_once() -> Result<()> {
    init_logging();

    let config = Config::from_env().context("Failed to load configuration")?;
    let reconciler = build_engine(&config).await?;
    let summary = run_scan(&reconciler)
        .await
        .context("Reconciliation scan failed")?;

    println!(
        "scan complete: {} files seen, {} created, {} modified, {} removed, {} skipped",
        summary.files_seen, summary.created, summary.modified, summary.removed, summary.skipped
    );

    Ok(())
}

/// Checks one file by name and reports its ledger state.
async fn run_check(filename: &str) -> Result<()> {
    init_logging();

    let config = Config::from_env().context("Failed to load configuration")?;
    let reconciler = build_engine(&config).await?;

    let Some(path) = reconciler.resolver().resolve(filename) else {
        eprintln!("'{filename}' not found in any monitored root");
        std::process::exit(1);
    };

    let transition = reconciler
        .observe(&path)
        .await
        .with_context(|| format!("Failed to observe {}", path.display()))?;

    let status = match transition {
        fileguard::ledger::Transition::Created => "added to monitoring",
        fileguard::ledger::Transition::Unchanged => "ok",
        fileguard::ledger::Transition::Modified { .. } => "modified",
    };

    let record = reconciler
        .ledger()
        .lookup(&path.to_string_lossy())
        .await
        .context("Failed to read back record")?
        .context("Record vanished after reconciliation")?;

    println!("status:   {status}");
    println!("name:     {}", reconciler.resolver().relative_display(&path));
    println!("path:     {}", record.path);
    println!("hash:     {}", record.current_hash);
    match record.previous_hash {
        Some(previous) => println!("previous: {previous}"),
        None => println!("previous: -"),
    }
    println!("observed: {}", record.last_observed_at.to_rfc3339());

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
