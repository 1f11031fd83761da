//! The chain source boundary: everything the scanner asks of the remote node.
//!
//! [`ChainSource`] is a narrow, query-only surface. The scanner treats every error it returns
//! uniformly: a failure while fetching a block stops the advance loop for the current cycle,
//! a failure while fetching a single transaction is recorded for retry.
//!
//! [`HttpChainSource`](crate::http::HttpChainSource) is the production implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Block, Transaction};

/// Reason prefix the node uses when it has no record of a transaction.
///
/// Failures carrying this prefix are permanent and are purged from the retry ledger.
pub const TX_NOT_FOUND_REASON_PREFIX: &str = "[-5]No information available about transaction";

#[derive(Debug, Error)]
pub enum ChainError {
    /// The node has no information about the transaction (pruned or invalid id).
    #[error("[-5]No information available about transaction {0}")]
    TransactionNotFound(String),

    #[error("Block at height {0} not found")]
    BlockNotFound(u64),

    /// Transport failure, timeout or server error.
    #[error("Chain source unavailable: {0}")]
    Unavailable(String),

    /// The node answered with data that could not be decoded.
    #[error("Malformed chain data: {0}")]
    Malformed(String),

    #[error("Operation not supported by this chain source: {0}")]
    Unsupported(&'static str),
}

pub type ChainResult<T> = Result<T, ChainError>;

#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Height of the node's current best block.
    async fn tip_height(&self) -> ChainResult<u64>;

    async fn block_at(&self, height: u64) -> ChainResult<Block>;

    async fn block_hash(&self, height: u64) -> ChainResult<String> {
        self.block_at(height).await.map(|block| block.header.hash)
    }

    /// A committed transaction.
    async fn transaction(&self, txid: &str) -> ChainResult<Transaction>;

    /// Ids of the transactions currently waiting in the node's mempool.
    async fn mempool_tx_ids(&self) -> ChainResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// A transaction that is still in the mempool.
    async fn mempool_transaction(&self, txid: &str) -> ChainResult<Transaction> {
        Err(ChainError::TransactionNotFound(txid.to_string()))
    }

    /// Fee charged for a single-party transfer at the given height.
    async fn fee_at(&self, height: u64) -> ChainResult<u64>;

    /// Fee charged for a multi-party or multi-asset transfer at the given height.
    async fn multi_fee_at(&self, height: u64) -> ChainResult<u64>;

    async fn balance_of(&self, address: &str, denom: &str) -> ChainResult<u64>;

    async fn transactions_by_address(&self, _address: &str) -> ChainResult<Vec<Transaction>> {
        Err(ChainError::Unsupported("transactions_by_address"))
    }
}
