use async_trait::async_trait;
use log::{debug, error};
use rusqlite::Connection;

use crate::{
    db::{self, ScanDbError, ScanDbResult, SqlitePool},
    models::{Block, ScanCursor, UnscannedRecord},
    scan::{config::BLOCK_CACHE_DEPTH, ledger::ScanLedger},
};

/// SQLite-backed [`ScanLedger`]. Every call runs on the blocking thread pool.
#[derive(Clone)]
pub struct ScanDbHandler {
    pool: SqlitePool,
}

impl ScanDbHandler {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, name: &'static str, f: F) -> ScanDbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> ScanDbResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            error!(task = name; "DB task failed: {}", e);
            ScanDbError::Unexpected(format!("{} task failed: {}", name, e))
        })?
    }
}

#[async_trait]
impl ScanLedger for ScanDbHandler {
    async fn get_cursor(&self) -> ScanDbResult<Option<ScanCursor>> {
        self.run("get_cursor", |conn| db::get_scan_cursor(conn)).await
    }

    async fn set_cursor(&self, cursor: &ScanCursor) -> ScanDbResult<()> {
        let cursor = cursor.clone();
        self.run("set_cursor", move |conn| db::set_scan_cursor(conn, &cursor)).await
    }

    async fn get_block(&self, height: u64) -> ScanDbResult<Option<Block>> {
        self.run("get_block", move |conn| db::get_block(conn, height)).await
    }

    async fn put_block(&self, block: &Block) -> ScanDbResult<()> {
        let block = block.clone();
        self.run("put_block", move |conn| {
            let tx = conn.transaction()?;
            db::upsert_block(&tx, &block)?;
            let pruned = db::prune_blocks_below(&tx, block.height().saturating_sub(BLOCK_CACHE_DEPTH))?;
            tx.commit()?;
            if pruned > 0 {
                debug!(pruned = pruned; "Pruned cached blocks");
            }
            Ok(())
        })
        .await
    }

    async fn delete_blocks_above(&self, height: u64) -> ScanDbResult<usize> {
        self.run("delete_blocks_above", move |conn| db::delete_blocks_above(conn, height))
            .await
    }

    async fn list_unscanned(&self) -> ScanDbResult<Vec<UnscannedRecord>> {
        self.run("list_unscanned", |conn| db::get_unscanned_records(conn, None)).await
    }

    async fn list_unscanned_at(&self, height: u64) -> ScanDbResult<Vec<UnscannedRecord>> {
        self.run("list_unscanned_at", move |conn| db::get_unscanned_records(conn, Some(height)))
            .await
    }

    async fn save_unscanned(&self, record: UnscannedRecord) -> ScanDbResult<()> {
        self.run("save_unscanned", move |conn| db::save_unscanned_record(conn, &record))
            .await
    }

    async fn delete_unscanned(&self, height: u64) -> ScanDbResult<usize> {
        self.run("delete_unscanned", move |conn| {
            db::delete_unscanned_records_by_height(conn, height)
        })
        .await
    }

    async fn delete_unscanned_record(&self, height: u64, txid: &str) -> ScanDbResult<usize> {
        let txid = txid.to_string();
        self.run("delete_unscanned_record", move |conn| {
            db::delete_unscanned_records_by_txid(conn, height, &txid)
        })
        .await
    }

    async fn delete_unscanned_by_reason_prefix(&self, prefix: &str) -> ScanDbResult<usize> {
        let prefix = prefix.to_string();
        self.run("delete_unscanned_by_reason_prefix", move |conn| {
            db::delete_unscanned_records_by_reason_prefix(conn, &prefix)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlockHeader;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_handler_persists_across_pools() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("scanner.db");

        {
            let handler = ScanDbHandler::new(db::init_db(&path).unwrap());
            handler.set_cursor(&ScanCursor::new(12, "h12")).await.unwrap();
            handler
                .put_block(&Block {
                    header: BlockHeader {
                        hash: "h12".into(),
                        previous_hash: "h11".into(),
                        height: 12,
                        timestamp: 0,
                    },
                    transactions: vec!["t".into()],
                })
                .await
                .unwrap();
            handler
                .save_unscanned(UnscannedRecord::new(12, "t", "timeout"))
                .await
                .unwrap();
        }

        let handler = ScanDbHandler::new(db::init_db(&path).unwrap());
        assert_eq!(handler.get_cursor().await.unwrap(), Some(ScanCursor::new(12, "h12")));
        assert_eq!(handler.get_block(12).await.unwrap().unwrap().hash(), "h12");
        assert_eq!(handler.list_unscanned_at(12).await.unwrap().len(), 1);
        assert_eq!(handler.delete_unscanned_record(12, "other").await.unwrap(), 0);
        assert_eq!(handler.delete_unscanned_record(12, "t").await.unwrap(), 1);
        assert_eq!(handler.delete_blocks_above(11).await.unwrap(), 1);
        assert!(handler.get_block(12).await.unwrap().is_none());
        assert!(handler.list_unscanned().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_block_prunes_old_entries() {
        let handler = ScanDbHandler::new(db::init_memory_db().unwrap());
        let block = |height: u64| Block {
            header: BlockHeader {
                hash: format!("h{}", height),
                previous_hash: format!("h{}", height - 1),
                height,
                timestamp: 0,
            },
            transactions: vec![],
        };

        handler.put_block(&block(1)).await.unwrap();
        handler.put_block(&block(BLOCK_CACHE_DEPTH + 5)).await.unwrap();

        assert!(handler.get_block(1).await.unwrap().is_none());
        assert!(handler.get_block(BLOCK_CACHE_DEPTH + 5).await.unwrap().is_some());
    }
}
