use std::time::Duration;

/// Default number of transactions fetched and classified concurrently.
pub const DEFAULT_MAX_CONCURRENT_EXTRACTIONS: usize = 20;

/// Default number of already-scanned blocks re-extracted at the end of every cycle.
pub const DEFAULT_RESCAN_LAST_BLOCK_COUNT: u64 = 1;

/// Default pause between two scan cycles in daemon mode.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(10);

/// Cached blocks older than this many heights behind the cursor are pruned.
pub const BLOCK_CACHE_DEPTH: u64 = 1000;

/// Lowest height the fork rewind may reach.
pub const MIN_REWIND_HEIGHT: u64 = 1;

/// Tunables of a [`ScanEngine`](crate::scan::ScanEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on in-flight transaction extractions within one batch.
    pub max_concurrent_extractions: usize,
    /// How many of the most recently scanned blocks are re-extracted after catching up.
    pub rescan_last_block_count: u64,
    /// Whether pending transactions are extracted after catching up.
    pub scan_mempool: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: DEFAULT_MAX_CONCURRENT_EXTRACTIONS,
            rescan_last_block_count: DEFAULT_RESCAN_LAST_BLOCK_COUNT,
            scan_mempool: false,
        }
    }
}
