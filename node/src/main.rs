// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # BlackBox Ledger Node
//!
//! Entry point for the `blackbox-node` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the ledger and serves the HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`     — start the ledger node
//! - `init`    — initialize a data directory and generate the audit key
//! - `verify`  — check a data directory's audit chain offline
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod notify;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;

use blackbox_ledger::audit::AuditChain;
use blackbox_ledger::crypto::AuditKeypair;
use blackbox_ledger::storage::{LedgerDb, LedgerStore};
use blackbox_ledger::TransactionLedger;

use cli::{BlackboxCli, Commands, AUDIT_KEY_FILE, DB_DIR};
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = BlackboxCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Verify(args) => verify_chain(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: ledger, notification dispatcher, API and metrics.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting blackbox-node"
    );

    // --- Audit key ---
    let keypair = match &args.audit_key {
        Some(hex_key) => {
            tracing::warn!("audit key taken from the command line or environment");
            AuditKeypair::from_hex(hex_key).context("invalid --audit-key")?
        }
        None => load_keypair(&args.data_dir)?,
    };

    // --- Persistent storage ---
    let db_path = args.data_dir.join(DB_DIR);
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let db = LedgerDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Ledger ---
    let config = args.ledger.to_config();
    let ledger = Arc::new(
        TransactionLedger::open(db, config, keypair).context("failed to open the ledger")?,
    );
    if !ledger.verify_audit_integrity() {
        tracing::error!("audit chain failed verification, run `blackbox-node verify` for details");
    }

    // --- Metrics ---
    let node_metrics =
        Arc::new(NodeMetrics::new().context("failed to register prometheus metrics")?);

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        ledger: Arc::clone(&ledger),
        metrics: Arc::clone(&node_metrics),
        fatal: Arc::new(Notify::new()),
    };
    app_state.refresh_gauges();

    let dispatcher = notify::spawn_dispatcher(ledger.subscribe(), Arc::clone(&node_metrics));

    // --- API server ---
    let api_router = api::create_router(app_state.clone());
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    let fatal = Arc::clone(&app_state.fatal);
    let mut failed = false;
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = fatal.notified() => {
            tracing::error!("ledger reported a fatal error, stopping");
            failed = true;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    dispatcher.abort();
    ledger.flush().context("failed to flush the ledger")?;
    tracing::info!("blackbox-node stopped");

    if failed {
        bail!("stopped after a fatal ledger error");
    }
    Ok(())
}

/// Reads the hex audit key written by `init`.
fn load_keypair(data_dir: &Path) -> Result<AuditKeypair> {
    let key_path = data_dir.join(AUDIT_KEY_FILE);
    let hex_key = std::fs::read_to_string(&key_path).with_context(|| {
        format!(
            "failed to read audit key at {} (run `blackbox-node init` first)",
            key_path.display()
        )
    })?;
    AuditKeypair::from_hex(hex_key.trim())
        .with_context(|| format!("invalid audit key in {}", key_path.display()))
}

/// Initializes a data directory and generates the audit signing key.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir.join(DB_DIR))
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(AUDIT_KEY_FILE);
    if key_path.exists() && !args.force {
        bail!(
            "audit key already exists at {} (use --force to replace it)",
            key_path.display()
        );
    }

    let keypair = AuditKeypair::generate();
    let pubkey_hex = keypair.public_key_hex();
    std::fs::write(&key_path, keypair.secret_hex())
        .with_context(|| format!("failed to write audit key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(
        public_key = %pubkey_hex,
        key_path = %key_path.display(),
        "audit keypair generated"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Audit key      : {}", key_path.display());
    println!("  Public key     : {}", pubkey_hex);

    Ok(())
}

/// Walks the stored audit chain without starting the ledger and prints the
/// report as JSON. Fails when the chain does not verify.
fn verify_chain(args: cli::VerifyArgs) -> Result<()> {
    logging::init_logging("blackbox_node=warn,blackbox_ledger=warn", LogFormat::Pretty);

    let db_path = args.data_dir.join(DB_DIR);
    if !db_path.exists() {
        bail!("no database at {}", db_path.display());
    }
    let db = LedgerDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let stored = db.load().context("failed to read the ledger")?;

    let chain = AuditChain::from_parts(stored.blocks, stored.checkpoint, None);
    let report = chain.verify_report();
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.valid {
        bail!(
            "audit chain invalid at block {}",
            report
                .first_invalid
                .map_or_else(|| "?".to_string(), |i| i.to_string())
        );
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("blackbox-node {}", env!("CARGO_PKG_VERSION"));
    println!("tax law       {}", blackbox_ledger::config::TAX_LAW_NAME);
    println!("rustc         {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
