use log::debug;
use rusqlite::{Connection, OptionalExtension, named_params};

use crate::db::ScanDbResult;
use crate::models::ScanCursor;

/// Returns the persisted cursor, or `None` if nothing has been scanned yet.
pub fn get_scan_cursor(conn: &Connection) -> ScanDbResult<Option<ScanCursor>> {
    let cursor = conn
        .query_row("SELECT height, hash FROM scan_cursor WHERE id = 1", [], |row| {
            let height: i64 = row.get(0)?;
            Ok(ScanCursor::new(height as u64, row.get::<_, String>(1)?))
        })
        .optional()?;
    Ok(cursor)
}

pub fn set_scan_cursor(conn: &Connection, cursor: &ScanCursor) -> ScanDbResult<()> {
    debug!(height = cursor.height; "DB: Moving scan cursor");

    conn.execute(
        r#"
        INSERT INTO scan_cursor (id, height, hash, updated_at)
        VALUES (1, :height, :hash, datetime('now'))
        ON CONFLICT(id) DO UPDATE SET
            height = excluded.height,
            hash = excluded.hash,
            updated_at = excluded.updated_at
        "#,
        named_params! {
            ":height": cursor.height as i64,
            ":hash": cursor.hash,
        },
    )?;
    Ok(())
}

pub fn clear_scan_cursor(conn: &Connection) -> ScanDbResult<()> {
    conn.execute("DELETE FROM scan_cursor", [])?;
    Ok(())
}
