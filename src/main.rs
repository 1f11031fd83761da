use anyhow::{Context, anyhow};
use chainscan::{
    cli::{Cli, Commands},
    config::{ApplyArgs, ConfigOverrides, ScannerConfig, load_configuration},
    daemon::{Daemon, engine_from_config},
    db,
    log::init_logging,
};
use clap::Parser;
use log::info;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    init_logging()?;
    let cli = Cli::parse();
    let mut config = load_configuration(&cli.config)?;

    match cli.command {
        Commands::Scan {
            connection,
            scan_mempool,
        } => {
            config.apply_args(&ConfigOverrides {
                scan_mempool,
                ..connection.overrides()
            });
            let engine = engine_from_config(&config)?;
            let report = engine.run_scan_cycle().await?;
            println!(
                "Scanned {} blocks ({} -> {}), {} fork rewinds, {} heights retried, {} records purged",
                report.blocks_scanned,
                report.start_height,
                report.final_height,
                report.forks,
                report.retried_heights,
                report.purged_records
            );
        },
        Commands::Daemon {
            connection,
            scan_interval_secs,
            scan_mempool,
        } => {
            config.apply_args(&ConfigOverrides {
                scan_interval_secs,
                scan_mempool,
                ..connection.overrides()
            });
            info!(
                base_url = config.base_url.as_str(),
                interval_secs = config.scan_interval_secs;
                "Starting daemon"
            );
            Daemon::new(config).run().await?;
        },
        Commands::RescanFrom { connection, height } => {
            config.apply_args(&connection.overrides());
            let engine = engine_from_config(&config)?;
            let cursor = engine.set_rescan_height(height).await?;
            println!("Next scan starts at height {}", cursor.height + 1);
        },
        Commands::ScanBlock { connection, height } => {
            config.apply_args(&connection.overrides());
            let engine = engine_from_config(&config)?;
            let header = engine.scan_block(height).await?;
            println!("Scanned block {} ({})", header.height, header.hash);
        },
        Commands::ExtractTx { connection, txid } => {
            config.apply_args(&connection.overrides());
            let engine = engine_from_config(&config)?;
            let watch_list = config.watch_list();
            let extracted = engine.extract_transaction_data(&txid, &watch_list).await?;
            print_json(&extracted.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<Vec<_>>())?;
        },
        Commands::Balance { connection, address } => {
            config.apply_args(&connection.overrides());
            let addresses = addresses_or_watch_list(address, &config);
            if addresses.is_empty() {
                return Err(anyhow!("No address given and the watch list is empty"));
            }
            let engine = engine_from_config(&config)?;
            for balance in engine.balances_by_address(&addresses).await? {
                println!("{}: {} {}", balance.address, balance.balance, balance.symbol);
            }
        },
        Commands::History { connection, address } => {
            config.apply_args(&connection.overrides());
            let engine = engine_from_config(&config)?;
            let history = engine.transactions_by_address(&address).await?;
            print_json(&history.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<Vec<_>>())?;
        },
        Commands::Unscanned { database_file, height } => {
            config.apply_args(&ConfigOverrides {
                database_path: database_file,
                ..Default::default()
            });
            let pool = db::init_db(&config.database_path)?;
            let conn = pool.get().context("Failed to get database connection")?;
            let records = db::get_unscanned_records(&conn, height)?;
            if records.is_empty() {
                println!("No unscanned records");
            }
            for record in records {
                let txid = if record.is_block_level() { "<block>" } else { record.txid.as_str() };
                println!("{:>10}  {}  {}", record.height, txid, record.reason);
            }
        },
    }

    Ok(())
}

fn addresses_or_watch_list(addresses: Vec<String>, config: &ScannerConfig) -> Vec<String> {
    if !addresses.is_empty() {
        return addresses;
    }
    config.watch.iter().map(|entry| entry.address.clone()).collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), anyhow::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
