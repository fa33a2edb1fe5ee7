// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Meridian Ledger Node
//!
//! Entry point for the `meridian-node` binary. Parses CLI arguments,
//! initializes logging and metrics, restores the ledger from disk, drives the
//! block timer, and serves the HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`     — start the node
//! - `init`    — create the data directory and an empty ledger store
//! - `inspect` — print what a stopped node's store holds
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod timer;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use meridian_protocol::block::ChainBlock;
use meridian_protocol::chain::Ledger;
use meridian_protocol::config::network_id_from_name;
use meridian_protocol::storage::{BlockStore, SledStore};

use cli::{Commands, MeridianNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;
use timer::BlockTimer;

/// Name of the sled database directory inside the data directory.
const STORE_DIR: &str = "ledger";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MeridianNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Inspect(args) => inspect_store(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn resolve_network(name: &str) -> Result<u32> {
    match network_id_from_name(name) {
        Some(id) => Ok(id),
        None => bail!("unknown network '{name}' (expected mainnet, testnet or localnet)"),
    }
}

fn store_path(data_dir: &Path) -> PathBuf {
    data_dir.join(STORE_DIR)
}

fn open_store(data_dir: &Path) -> Result<BlockStore<SledStore>> {
    let path = store_path(data_dir);
    std::fs::create_dir_all(&path)
        .with_context(|| format!("failed to create store directory: {}", path.display()))?;
    let store = SledStore::open(&path)
        .with_context(|| format!("failed to open ledger store at {}", path.display()))?;
    tracing::info!(path = %path.display(), "ledger store opened");
    Ok(BlockStore::new(store))
}

/// Starts the node: restores the ledger, runs the block timer, and serves the
/// API and metrics endpoints until a shutdown signal arrives.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "meridian_node=info,meridian_protocol=info,tower_http=debug",
        LogFormat::from_str_lossy(&args.log_format),
    );

    let network_id = resolve_network(&args.network)?;
    if args.minute_ms == 0 {
        bail!("--minute-ms must be greater than zero");
    }

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        network = %args.network,
        server_index = args.server_index,
        minute_ms = args.minute_ms,
        data_dir = %args.data_dir.display(),
        "starting meridian-node"
    );

    // --- Persistent storage ---
    let store = Arc::new(open_store(&args.data_dir)?);

    // --- Ledger ---
    let ledger = Arc::new(
        Ledger::restore(network_id, args.server_index, &store)
            .context("failed to restore ledger from store")?,
    );

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            meridian_protocol::config::PROTOCOL_VERSION,
        ),
        network: args.network.clone(),
        ledger: Arc::clone(&ledger),
        store: Arc::clone(&store),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
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

    // --- Block timer ---
    let block_timer = BlockTimer::new(
        Arc::clone(&ledger),
        Arc::clone(&store),
        Arc::clone(&node_metrics),
    );
    let timer_task = tokio::spawn(block_timer.run(Duration::from_millis(args.minute_ms)));

    // --- Serve ---
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
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    // The open height is not persisted; it is rebuilt empty on restart.
    timer_task.abort();
    store
        .inner()
        .flush()
        .context("failed to flush ledger store")?;
    tracing::info!(height = ledger.height(), "meridian-node stopped");
    Ok(())
}

/// Creates the data directory and an empty store, and checks that any blocks
/// already there belong to the requested network.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("meridian_node=info", LogFormat::Pretty);

    let network_id = resolve_network(&args.network)?;
    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), network = %args.network, "initializing node");

    let store = open_store(data_dir)?;
    let ledger = Ledger::restore(network_id, 0, &store)
        .context("existing store does not belong to this network")?;
    store
        .inner()
        .flush()
        .context("failed to flush ledger store")?;

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Store          : {}", store_path(data_dir).display());
    println!("  Network        : {} ({:#010x})", args.network, network_id);
    println!("  Next height    : {}", ledger.height());

    Ok(())
}

/// Prints a summary of the store, or one directory block as JSON.
fn inspect_store(args: cli::InspectArgs) -> Result<()> {
    logging::init_logging("meridian_node=warn", LogFormat::Pretty);

    let path = store_path(&args.data_dir);
    if !path.exists() {
        bail!("no ledger store at {}", path.display());
    }
    let store = open_store(&args.data_dir)?;

    if let Some(height) = args.height {
        let block = store
            .fetch_directory_block_by_height(height)
            .context("failed to read directory block")?
            .with_context(|| format!("no directory block at height {height}"))?;
        let view = api::DirectoryBlockResponse::from(&block);
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let directory_blocks = store.fetch_all_directory_blocks()?;
    let credit_blocks = store.fetch_all_credit_blocks()?;
    let entry_blocks = store.fetch_all_entry_blocks()?;
    let mut chains: Vec<_> = entry_blocks.iter().map(|b| b.header().chain_id).collect();
    chains.dedup();

    println!("Ledger store  : {}", path.display());
    match store.latest_directory_height()? {
        Some(height) => println!("Latest height : {}", height),
        None => println!("Latest height : none (empty store)"),
    }
    if let Some(tip) = directory_blocks.last() {
        println!("Network       : {:#010x}", tip.header().network_id);
        println!("Tip key MR    : {}", tip.key_merkle_root());
    }
    println!("Directory     : {} blocks", directory_blocks.len());
    println!("Entry credit  : {} blocks", credit_blocks.len());
    println!(
        "Entry chains  : {} ({} blocks)",
        chains.len(),
        entry_blocks.len()
    );

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("meridian-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol      {}", meridian_protocol::config::PROTOCOL_VERSION);
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
