//! SQLite persistence for the scan cursor, the block cache and the unscanned-record ledger.
//!
//! All functions take a borrowed [`Connection`](rusqlite::Connection) so callers decide the
//! transaction boundaries. Async callers go through
//! [`ScanDbHandler`](crate::scan::ScanDbHandler), which moves the work onto the blocking pool.

use std::path::Path;

use include_dir::{Dir, include_dir};
use log::debug;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite_migration::Migrations;

mod error;
pub use error::{ScanDbError, ScanDbResult};

mod scan_cursor;
pub use scan_cursor::{clear_scan_cursor, get_scan_cursor, set_scan_cursor};

mod blocks;
pub use blocks::{delete_blocks_above, get_block, prune_blocks_below, upsert_block};

mod unscanned_records;
pub use unscanned_records::{
    delete_unscanned_records_by_height, delete_unscanned_records_by_reason_prefix, delete_unscanned_records_by_txid,
    get_unscanned_records, save_unscanned_record,
};

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

static MIGRATIONS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/migrations");

const MAX_POOL_SIZE: u32 = 8;

/// Opens (creating if needed) the scanner database and applies pending migrations.
pub fn init_db(db_path: impl AsRef<Path>) -> ScanDbResult<SqlitePool> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    debug!(path:% = db_path.display(); "Opening scanner database");

    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
    });
    let pool = r2d2::Pool::builder().max_size(MAX_POOL_SIZE).build(manager)?;

    let mut conn = pool.get()?;
    let migrations = Migrations::from_directory(&MIGRATIONS_DIR)?;
    migrations.to_latest(&mut conn)?;

    Ok(pool)
}

/// A single-connection pool over a private in-memory database, for tests and dry runs.
pub fn init_memory_db() -> ScanDbResult<SqlitePool> {
    let manager = SqliteConnectionManager::memory();
    let pool = r2d2::Pool::builder().max_size(1).build(manager)?;

    let mut conn = pool.get()?;
    Migrations::from_directory(&MIGRATIONS_DIR)?.to_latest(&mut conn)?;

    Ok(pool)
}
