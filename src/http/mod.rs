//! HTTP access to the chain gateway.
//!
//! - [`HttpChainSource`] - [`ChainSource`](crate::chain::ChainSource) implementation over the gateway's REST API
//! - [`HttpError`] - Transport and decoding failures, converted into
//!   [`ChainError`](crate::chain::ChainError) at the trait boundary
//!
//! Transient failures are retried with exponential backoff by the client middleware before
//! they ever reach the scanner.

mod chain_source;
mod error;
mod http_client;
mod types;

pub use chain_source::HttpChainSource;
pub use error::HttpError;
pub use http_client::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS};
pub use types::{
    AccountResponse, AddressTransactionsResponse, BalanceEntry, BlockResponse, CoinAmount, FeeResponse,
    MempoolResponse, TipResponse, TransactionResponse, TransferParty,
};
