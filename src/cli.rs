use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ConfigOverrides;

#[derive(Parser)]
#[command(name = "chainscan")]
#[command(about = "Fork-aware block scanner", long_about = None)]
pub struct Cli {
    #[arg(
        short,
        long,
        global = true,
        help = "Path to the configuration file (created with defaults if missing)",
        default_value = "data/config.toml"
    )]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone, Debug, Default)]
pub struct ConnectionArgs {
    #[arg(short = 'u', long, help = "The base URL of the chain node HTTP API")]
    pub base_url: Option<String>,
    #[arg(short, long, help = "Path to the database file")]
    pub database_file: Option<PathBuf>,
}

impl ConnectionArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            base_url: self.base_url.clone(),
            database_path: self.database_file.clone(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one scan cycle: catch up with the tip, then retry unscanned records
    Scan {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[arg(long, help = "Also extract pending mempool transactions")]
        scan_mempool: bool,
    },
    /// Scan continuously until Ctrl+C
    Daemon {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[arg(short, long, help = "Interval between scan cycles in seconds")]
        scan_interval_secs: Option<u64>,
        #[arg(long, help = "Also extract pending mempool transactions")]
        scan_mempool: bool,
    },
    /// Move the scan cursor so that the next cycle starts at the given height
    RescanFrom {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[arg(help = "First height to scan again (at least 2)")]
        height: u64,
    },
    /// Extract a single block without moving the scan cursor
    ScanBlock {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[arg(help = "Height of the block")]
        height: u64,
    },
    /// Classify one transaction against the configured watch list and print the result
    ExtractTx {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[arg(help = "Transaction id")]
        txid: String,
    },
    /// Show native-asset balances of addresses
    Balance {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[arg(
            short,
            long,
            help = "Address to query. Can be specified multiple times. Defaults to the watch list"
        )]
        address: Vec<String>,
    },
    /// Print the transaction history of addresses, classified per address
    History {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[arg(short, long, required = true, help = "Address to query. Can be specified multiple times")]
        address: Vec<String>,
    },
    /// List records waiting to be retried
    Unscanned {
        #[arg(short, long, help = "Path to the database file")]
        database_file: Option<PathBuf>,
        #[arg(long, help = "Only list records at this height")]
        height: Option<u64>,
    },
}
