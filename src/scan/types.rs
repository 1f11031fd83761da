use thiserror::Error;

use crate::{chain::ChainError, db::ScanDbError};

/// Errors that can stop a scan cycle.
///
/// Per-transaction failures never surface here; they are recorded in the unscanned ledger
/// and retried. What remains are failures the engine cannot route around.
#[derive(Debug, Error)]
pub enum ScanError {
    /// An unrecoverable error that should stop scanning entirely.
    #[error("Fatal error: {0}")]
    Fatal(#[from] anyhow::Error),

    /// A temporary error that may resolve on the next cycle.
    #[error("Intermittent error: {0}")]
    Intermittent(String),

    /// The local ledger could not be read or written.
    #[error("Database execution error: {0}")]
    DbError(#[from] ScanDbError),

    /// A single transaction requested by a caller could not be extracted.
    #[error("Transaction {txid} could not be extracted: {reason}")]
    Extraction { txid: String, reason: String },

    #[error("Invalid scan height {0}")]
    InvalidHeight(u64),

    /// A chain query made on behalf of a caller (not the advance loop) failed.
    #[error("Chain source error: {0}")]
    Chain(#[from] ChainError),
}
