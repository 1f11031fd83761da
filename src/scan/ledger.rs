//! Durable scan state: the cursor, the block cache and the unscanned-record ledger.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::db::{ScanDbError, ScanDbResult};
use crate::models::{Block, ScanCursor, UnscannedRecord};

#[async_trait]
pub trait ScanLedger: Send + Sync {
    async fn get_cursor(&self) -> ScanDbResult<Option<ScanCursor>>;

    async fn set_cursor(&self, cursor: &ScanCursor) -> ScanDbResult<()>;

    async fn get_block(&self, height: u64) -> ScanDbResult<Option<Block>>;

    /// Caches a block, overwriting any block previously stored at its height.
    async fn put_block(&self, block: &Block) -> ScanDbResult<()>;

    /// Drops cached blocks above `height`, returning how many were removed.
    async fn delete_blocks_above(&self, height: u64) -> ScanDbResult<usize>;

    /// Every unscanned record, ordered by height.
    async fn list_unscanned(&self) -> ScanDbResult<Vec<UnscannedRecord>>;

    async fn list_unscanned_at(&self, height: u64) -> ScanDbResult<Vec<UnscannedRecord>>;

    async fn save_unscanned(&self, record: UnscannedRecord) -> ScanDbResult<()>;

    /// Deletes every record at `height`, returning how many were removed.
    async fn delete_unscanned(&self, height: u64) -> ScanDbResult<usize>;

    /// Deletes the record of one transaction. An empty `txid` targets the block-level record.
    async fn delete_unscanned_record(&self, height: u64, txid: &str) -> ScanDbResult<usize>;

    async fn delete_unscanned_by_reason_prefix(&self, prefix: &str) -> ScanDbResult<usize>;
}

#[derive(Debug, Default)]
struct MemoryState {
    cursor: Option<ScanCursor>,
    blocks: BTreeMap<u64, Block>,
    unscanned: HashMap<String, UnscannedRecord>,
    // Insertion order, so listings are stable within a height.
    sequence: BTreeMap<String, u64>,
    next_sequence: u64,
}

/// Process-local [`ScanLedger`]. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryScanLedger {
    state: Mutex<MemoryState>,
}

impl MemoryScanLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> ScanDbResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| ScanDbError::Unexpected(format!("ledger lock poisoned: {}", e)))?;
        Ok(f(&mut state))
    }

    fn sorted(state: &MemoryState, mut records: Vec<UnscannedRecord>) -> Vec<UnscannedRecord> {
        records.sort_by_key(|r| (r.height, state.sequence.get(&r.id).copied().unwrap_or(u64::MAX)));
        records
    }
}

#[async_trait]
impl ScanLedger for MemoryScanLedger {
    async fn get_cursor(&self) -> ScanDbResult<Option<ScanCursor>> {
        self.with_state(|s| s.cursor.clone())
    }

    async fn set_cursor(&self, cursor: &ScanCursor) -> ScanDbResult<()> {
        self.with_state(|s| s.cursor = Some(cursor.clone()))
    }

    async fn get_block(&self, height: u64) -> ScanDbResult<Option<Block>> {
        self.with_state(|s| s.blocks.get(&height).cloned())
    }

    async fn put_block(&self, block: &Block) -> ScanDbResult<()> {
        self.with_state(|s| {
            s.blocks.insert(block.height(), block.clone());
        })
    }

    async fn delete_blocks_above(&self, height: u64) -> ScanDbResult<usize> {
        self.with_state(|s| {
            let before = s.blocks.len();
            s.blocks.retain(|h, _| *h <= height);
            before - s.blocks.len()
        })
    }

    async fn list_unscanned(&self) -> ScanDbResult<Vec<UnscannedRecord>> {
        self.with_state(|s| Self::sorted(s, s.unscanned.values().cloned().collect()))
    }

    async fn list_unscanned_at(&self, height: u64) -> ScanDbResult<Vec<UnscannedRecord>> {
        self.with_state(|s| {
            let records = s.unscanned.values().filter(|r| r.height == height).cloned().collect();
            Self::sorted(s, records)
        })
    }

    async fn save_unscanned(&self, record: UnscannedRecord) -> ScanDbResult<()> {
        self.with_state(|s| {
            let sequence = s.next_sequence;
            s.next_sequence += 1;
            s.sequence.insert(record.id.clone(), sequence);
            s.unscanned.insert(record.id.clone(), record);
        })
    }

    async fn delete_unscanned(&self, height: u64) -> ScanDbResult<usize> {
        self.with_state(|s| {
            let before = s.unscanned.len();
            s.unscanned.retain(|_, r| r.height != height);
            let MemoryState { unscanned, sequence, .. } = s;
            sequence.retain(|id, _| unscanned.contains_key(id));
            before - unscanned.len()
        })
    }

    async fn delete_unscanned_record(&self, height: u64, txid: &str) -> ScanDbResult<usize> {
        let id = UnscannedRecord::record_id(height, txid);
        self.with_state(|s| {
            s.sequence.remove(&id);
            usize::from(s.unscanned.remove(&id).is_some())
        })
    }

    async fn delete_unscanned_by_reason_prefix(&self, prefix: &str) -> ScanDbResult<usize> {
        self.with_state(|s| {
            let before = s.unscanned.len();
            s.unscanned.retain(|_, r| !r.reason.starts_with(prefix));
            let MemoryState { unscanned, sequence, .. } = s;
            sequence.retain(|id, _| unscanned.contains_key(id));
            before - unscanned.len()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_ledger_unscanned_bookkeeping() {
        let ledger = MemoryScanLedger::new();
        ledger.save_unscanned(UnscannedRecord::new(5, "b", "x")).await.unwrap();
        ledger.save_unscanned(UnscannedRecord::new(3, "a", "x")).await.unwrap();
        ledger.save_unscanned(UnscannedRecord::new(5, "c", "[-5]gone")).await.unwrap();
        ledger.save_unscanned(UnscannedRecord::new(5, "b", "y")).await.unwrap();

        let all = ledger.list_unscanned().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].height, 3);

        assert_eq!(ledger.delete_unscanned_by_reason_prefix("[-5]").await.unwrap(), 1);
        let at_five = ledger.list_unscanned_at(5).await.unwrap();
        assert_eq!(at_five.len(), 1);
        assert_eq!(at_five[0].reason, "y");

        assert_eq!(ledger.delete_unscanned_record(5, "b").await.unwrap(), 1);
        assert_eq!(ledger.delete_unscanned_record(5, "b").await.unwrap(), 0);
        assert_eq!(ledger.delete_unscanned(5).await.unwrap(), 0);
        assert_eq!(ledger.list_unscanned().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_memory_ledger_drops_blocks_above_height() {
        let ledger = MemoryScanLedger::new();
        for height in 1..=5 {
            ledger
                .put_block(&Block {
                    header: crate::models::BlockHeader {
                        hash: format!("h{}", height),
                        previous_hash: format!("h{}", height - 1),
                        height,
                        timestamp: 0,
                    },
                    transactions: vec![],
                })
                .await
                .unwrap();
        }

        assert_eq!(ledger.delete_blocks_above(3).await.unwrap(), 2);
        assert!(ledger.get_block(3).await.unwrap().is_some());
        assert!(ledger.get_block(4).await.unwrap().is_none());
    }
}
