use log::debug;
use rusqlite::{Connection, OptionalExtension, named_params};

use crate::db::ScanDbResult;
use crate::models::{Block, BlockHeader};

/// Stores a block, replacing any previous entry at the same height.
pub fn upsert_block(conn: &Connection, block: &Block) -> ScanDbResult<()> {
    let transactions = serde_json::to_string(&block.transactions)?;
    conn.execute(
        r#"
        INSERT INTO blocks (height, hash, previous_hash, timestamp, transactions)
        VALUES (:height, :hash, :previous_hash, :timestamp, :transactions)
        ON CONFLICT(height) DO UPDATE SET
            hash = excluded.hash,
            previous_hash = excluded.previous_hash,
            timestamp = excluded.timestamp,
            transactions = excluded.transactions,
            created_at = datetime('now')
        "#,
        named_params! {
            ":height": block.height() as i64,
            ":hash": block.header.hash,
            ":previous_hash": block.header.previous_hash,
            ":timestamp": block.header.timestamp as i64,
            ":transactions": transactions,
        },
    )?;
    Ok(())
}

pub fn get_block(conn: &Connection, height: u64) -> ScanDbResult<Option<Block>> {
    let row = conn
        .query_row(
            "SELECT hash, previous_hash, timestamp, transactions FROM blocks WHERE height = :height",
            named_params! { ":height": height as i64 },
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((hash, previous_hash, timestamp, transactions)) => Ok(Some(Block {
            header: BlockHeader {
                hash,
                previous_hash,
                height,
                timestamp: timestamp as u64,
            },
            transactions: serde_json::from_str(&transactions)?,
        })),
        None => Ok(None),
    }
}

/// Drops cached blocks above `height`. Used when the cursor is moved backwards.
pub fn delete_blocks_above(conn: &Connection, height: u64) -> ScanDbResult<usize> {
    let count = conn.execute(
        "DELETE FROM blocks WHERE height > :height",
        named_params! { ":height": height as i64 },
    )?;
    if count > 0 {
        debug!(height = height, count = count; "DB: Dropped cached blocks above height");
    }
    Ok(count)
}

/// Keeps the block cache bounded.
pub fn prune_blocks_below(conn: &Connection, height: u64) -> ScanDbResult<usize> {
    let count = conn.execute(
        "DELETE FROM blocks WHERE height < :height",
        named_params! { ":height": height as i64 },
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;

    fn block(height: u64, hash: &str) -> Block {
        Block {
            header: BlockHeader {
                hash: hash.to_string(),
                previous_hash: format!("prev-{}", hash),
                height,
                timestamp: 1_700_000_000 + height,
            },
            transactions: vec![format!("tx-{}", height)],
        }
    }

    #[test]
    fn test_upsert_replaces_same_height() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();

        upsert_block(&conn, &block(5, "a")).unwrap();
        upsert_block(&conn, &block(5, "b")).unwrap();

        let stored = get_block(&conn, 5).unwrap().unwrap();
        assert_eq!(stored.hash(), "b");
        assert_eq!(stored.transactions, vec!["tx-5".to_string()]);
        assert!(get_block(&conn, 6).unwrap().is_none());
    }

    #[test]
    fn test_delete_and_prune() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();
        for h in 1..=10 {
            upsert_block(&conn, &block(h, &format!("h{}", h))).unwrap();
        }

        assert_eq!(delete_blocks_above(&conn, 8).unwrap(), 2);
        assert_eq!(prune_blocks_below(&conn, 3).unwrap(), 2);
        assert!(get_block(&conn, 2).unwrap().is_none());
        assert!(get_block(&conn, 3).unwrap().is_some());
        assert!(get_block(&conn, 9).unwrap().is_none());
    }
}
