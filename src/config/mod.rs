mod loader;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use loader::{ENV_PREFIX, get_default_config, load_configuration, write_config_to};

use crate::{
    http::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS},
    scan::{
        ChainAsset, EngineConfig, WatchEntry, WatchList,
        config::{DEFAULT_MAX_CONCURRENT_EXTRACTIONS, DEFAULT_RESCAN_LAST_BLOCK_COUNT, DEFAULT_SCAN_INTERVAL},
    },
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    pub secret: String,
}

/// Everything the binary needs to run a scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub base_url: String,
    pub database_path: PathBuf,
    pub scan_interval_secs: u64,
    pub max_concurrent_extractions: usize,
    pub rescan_last_block_count: u64,
    pub scan_mempool: bool,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub asset: ChainAsset,
    pub webhook: Option<WebhookConfig>,
    pub watch: Vec<WatchEntry>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            database_path: PathBuf::from("data/chainscan.db"),
            scan_interval_secs: DEFAULT_SCAN_INTERVAL.as_secs(),
            max_concurrent_extractions: DEFAULT_MAX_CONCURRENT_EXTRACTIONS,
            rescan_last_block_count: DEFAULT_RESCAN_LAST_BLOCK_COUNT,
            scan_mempool: false,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            asset: ChainAsset::default(),
            webhook: None,
            watch: Vec::new(),
        }
    }
}

impl ScannerConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrent_extractions: self.max_concurrent_extractions,
            rescan_last_block_count: self.rescan_last_block_count,
            scan_mempool: self.scan_mempool,
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn watch_list(&self) -> WatchList {
        self.watch.iter().cloned().collect()
    }
}

/// Command-line values that take precedence over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub database_path: Option<PathBuf>,
    pub scan_interval_secs: Option<u64>,
    pub scan_mempool: bool,
}

pub trait ApplyArgs {
    fn apply_args(&mut self, overrides: &ConfigOverrides);
}

impl ApplyArgs for ScannerConfig {
    fn apply_args(&mut self, overrides: &ConfigOverrides) {
        if let Some(base_url) = &overrides.base_url {
            self.base_url = base_url.clone();
        }
        if let Some(path) = &overrides.database_path {
            self.database_path = path.clone();
        }
        if let Some(secs) = overrides.scan_interval_secs {
            self.scan_interval_secs = secs;
        }
        if overrides.scan_mempool {
            self.scan_mempool = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_win() {
        let mut config = ScannerConfig::default();
        config.apply_args(&ConfigOverrides {
            base_url: Some("http://other".to_string()),
            scan_interval_secs: Some(3),
            scan_mempool: true,
            ..Default::default()
        });

        assert_eq!(config.base_url, "http://other");
        assert_eq!(config.scan_interval(), Duration::from_secs(3));
        assert!(config.engine_config().scan_mempool);
        assert_eq!(config.database_path, PathBuf::from("data/chainscan.db"));
    }
}
