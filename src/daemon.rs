//! Long-running scanner mode.
//!
//! The [`Daemon`] wires a [`ScanEngine`] from the configuration, hands it to a [`ScanTask`] and
//! keeps it running until Ctrl+C or a fatal scan error. Intermittent errors (the node being
//! unreachable, a block that cannot be fetched) are logged by the task and retried on the next
//! interval.
//!
//! ```ignore
//! let config = load_configuration(Path::new("data/config.toml"))?;
//! Daemon::new(config).run().await?;
//! ```

use std::sync::Arc;

use anyhow::anyhow;
use log::{error, info};
use tokio::{signal, sync::broadcast};
use url::Url;

use crate::{
    config::ScannerConfig,
    db,
    http::HttpChainSource,
    notify::{LoggingObserver, WebhookNotifySink},
    scan::{ScanDbHandler, ScanEngine, ScanError, ScanTask},
};

/// Builds an engine over the HTTP chain source and the SQLite ledger described by `config`.
pub fn engine_from_config(config: &ScannerConfig) -> Result<ScanEngine, ScanError> {
    let base_url = Url::parse(&config.base_url)
        .map_err(|e| ScanError::Fatal(anyhow!("Invalid base URL {}: {}", config.base_url, e)))?;
    let chain = HttpChainSource::with_config(base_url, config.max_retries, config.request_timeout())?;
    let pool = db::init_db(&config.database_path)?;
    let ledger = ScanDbHandler::new(pool);

    let logging = Arc::new(LoggingObserver);
    let mut builder = ScanEngine::builder(Arc::new(chain), Arc::new(ledger), config.asset.clone())
        .config(config.engine_config())
        .resolver(Arc::new(config.watch_list()))
        .observer(logging.clone())
        .notify_sink(logging);

    if let Some(webhook) = &config.webhook {
        let sink = WebhookNotifySink::new(webhook.url.clone(), webhook.secret.clone())
            .map_err(|e| ScanError::Fatal(anyhow!("Cannot create webhook sink: {}", e)))?;
        info!(url = webhook.url.as_str(); "Delivering extracted data to webhook");
        builder = builder.notify_sink(Arc::new(sink));
    }

    Ok(builder.build())
}

pub struct Daemon {
    config: ScannerConfig,
}

impl Daemon {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Runs until Ctrl+C is pressed or the scan task hits a fatal error.
    pub async fn run(&self) -> Result<(), ScanError> {
        info!("Daemon started. Press Ctrl+C to stop.");

        let engine = engine_from_config(&self.config)?;
        let task = ScanTask::new(engine, self.config.scan_interval());

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let ctrlc_handle = tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal, stopping the scanner..."),
                Err(e) => error!(error:% = e; "Failed to listen for ctrl_c, stopping the scanner"),
            }
            let _ = shutdown_tx.send(());
        });

        task.run().await;

        let result = tokio::select! {
            _ = shutdown_rx.recv() => task.stop().await,
            res = task.wait() => res,
        };
        ctrlc_handle.abort();

        match result {
            Ok(()) => {
                info!("Daemon stopped gracefully.");
                Ok(())
            },
            Err(e) => {
                error!(error:% = e; "Scanner stopped on a fatal error");
                Err(e)
            },
        }
    }
}
