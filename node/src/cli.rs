//! # CLI Interface
//!
//! Command-line structure for `meridian-node`, built with `clap` derive.
//! Subcommands: `run`, `init`, `inspect`, and `version`. Every flag can
//! also come from a `MERIDIAN_*` environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Meridian ledger node.
///
/// Builds one directory height per block period, persists every sealed
/// height, and serves the ledger over a JSON API and Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "meridian-node",
    about = "Meridian ledger node",
    version,
    propagate_version = true
)]
pub struct MeridianNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Create the data directory and an empty ledger store.
    Init(InitArgs),
    /// Print what the store in a data directory holds.
    Inspect(InspectArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the sled ledger store.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "MERIDIAN_DATA_DIR", default_value = "./meridian-data")]
    pub data_dir: PathBuf,

    /// Port for the JSON API.
    #[arg(long, env = "MERIDIAN_API_PORT", default_value_t = 8088)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "MERIDIAN_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Network to join: mainnet, testnet, or localnet.
    #[arg(long, env = "MERIDIAN_NETWORK", default_value = "localnet")]
    pub network: String,

    /// Length of one minute of a block period, in milliseconds.
    ///
    /// Ten minutes make a directory height. Shorten it for local testing.
    #[arg(long, env = "MERIDIAN_MINUTE_MS", default_value_t = meridian_protocol::config::DEFAULT_MINUTE_MS)]
    pub minute_ms: u64,

    /// Log output format: pretty or json.
    #[arg(long, env = "MERIDIAN_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Index of this server, recorded at the start of every credit block.
    #[arg(long, env = "MERIDIAN_SERVER_INDEX", default_value_t = 0)]
    pub server_index: u8,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "MERIDIAN_DATA_DIR", default_value = "./meridian-data")]
    pub data_dir: PathBuf,

    /// Network the store will belong to: mainnet, testnet, or localnet.
    #[arg(long, env = "MERIDIAN_NETWORK", default_value = "localnet")]
    pub network: String,
}

/// Arguments for the `inspect` subcommand.
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Data directory of a stopped node.
    #[arg(long, short = 'd', env = "MERIDIAN_DATA_DIR", default_value = "./meridian-data")]
    pub data_dir: PathBuf,

    /// Print the directory block at this height instead of a summary.
    #[arg(long)]
    pub height: Option<u32>,
}
