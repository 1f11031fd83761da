use log::debug;
use rusqlite::{Connection, named_params};

use crate::db::ScanDbResult;
use crate::models::UnscannedRecord;

/// Saves a record. A record with the same (height, txid) replaces the previous one.
pub fn save_unscanned_record(conn: &Connection, record: &UnscannedRecord) -> ScanDbResult<()> {
    debug!(
        height = record.height,
        txid = record.txid.as_str();
        "DB: Saving unscanned record"
    );

    conn.execute(
        r#"
        INSERT OR REPLACE INTO unscanned_records (id, height, txid, reason, created_at)
        VALUES (:id, :height, :txid, :reason, datetime('now'))
        "#,
        named_params! {
            ":id": record.id,
            ":height": record.height as i64,
            ":txid": record.txid,
            ":reason": record.reason,
        },
    )?;
    Ok(())
}

/// Returns records at `height`, or every record when `height` is `None`, ordered by height.
pub fn get_unscanned_records(conn: &Connection, height: Option<u64>) -> ScanDbResult<Vec<UnscannedRecord>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT id, height, txid, reason
        FROM unscanned_records
        WHERE :height IS NULL OR height = :height
        ORDER BY height ASC, created_at ASC, id ASC
        "#,
    )?;

    let rows = stmt.query_map(named_params! { ":height": height.map(|h| h as i64) }, |row| {
        let height: i64 = row.get(1)?;
        Ok(UnscannedRecord {
            id: row.get(0)?,
            height: height as u64,
            txid: row.get(2)?,
            reason: row.get(3)?,
        })
    })?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

pub fn delete_unscanned_records_by_height(conn: &Connection, height: u64) -> ScanDbResult<usize> {
    let count = conn.execute(
        "DELETE FROM unscanned_records WHERE height = :height",
        named_params! { ":height": height as i64 },
    )?;
    Ok(count)
}

/// Deletes the single record of `txid` at `height`. An empty `txid` targets the block-level record.
pub fn delete_unscanned_records_by_txid(conn: &Connection, height: u64, txid: &str) -> ScanDbResult<usize> {
    let count = conn.execute(
        "DELETE FROM unscanned_records WHERE height = :height AND txid = :txid",
        named_params! { ":height": height as i64, ":txid": txid },
    )?;
    Ok(count)
}

/// Deletes every record whose reason starts with `prefix`.
pub fn delete_unscanned_records_by_reason_prefix(conn: &Connection, prefix: &str) -> ScanDbResult<usize> {
    let count = conn.execute(
        "DELETE FROM unscanned_records WHERE substr(reason, 1, length(:prefix)) = :prefix",
        named_params! { ":prefix": prefix },
    )?;
    if count > 0 {
        debug!(count = count; "DB: Purged permanently failed records");
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TX_NOT_FOUND_REASON_PREFIX;
    use crate::db::init_memory_db;

    #[test]
    fn test_save_is_idempotent_per_height_and_txid() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();

        save_unscanned_record(&conn, &UnscannedRecord::new(7, "a", "timeout")).unwrap();
        save_unscanned_record(&conn, &UnscannedRecord::new(7, "a", "timeout again")).unwrap();
        save_unscanned_record(&conn, &UnscannedRecord::new(7, "b", "timeout")).unwrap();
        save_unscanned_record(&conn, &UnscannedRecord::new(3, "", "block fetch failed")).unwrap();

        let all = get_unscanned_records(&conn, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].height, 3);
        assert!(all[0].is_block_level());

        let at_seven = get_unscanned_records(&conn, Some(7)).unwrap();
        assert_eq!(at_seven.len(), 2);
        let a = at_seven.iter().find(|r| r.txid == "a").unwrap();
        assert_eq!(a.reason, "timeout again");
    }

    #[test]
    fn test_deletes() {
        let pool = init_memory_db().unwrap();
        let conn = pool.get().unwrap();

        save_unscanned_record(&conn, &UnscannedRecord::new(7, "a", "timeout")).unwrap();
        save_unscanned_record(&conn, &UnscannedRecord::new(7, "b", "timeout")).unwrap();
        save_unscanned_record(&conn, &UnscannedRecord::new(8, "c", "timeout")).unwrap();
        save_unscanned_record(
            &conn,
            &UnscannedRecord::new(9, "d", format!("{} d", TX_NOT_FOUND_REASON_PREFIX)),
        )
        .unwrap();

        assert_eq!(delete_unscanned_records_by_reason_prefix(&conn, TX_NOT_FOUND_REASON_PREFIX).unwrap(), 1);
        assert_eq!(delete_unscanned_records_by_txid(&conn, 7, "a").unwrap(), 1);
        assert_eq!(delete_unscanned_records_by_height(&conn, 7).unwrap(), 1);

        let remaining = get_unscanned_records(&conn, None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].txid, "c");
    }
}
