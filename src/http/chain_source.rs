//! [`ChainSource`] backed by the chain's HTTP gateway.
//!
//! # Endpoints
//!
//! | Operation | Path |
//! |-----------|------|
//! | tip height | `GET /api/v1/tip` |
//! | block | `GET /api/v1/blocks/{height}` |
//! | transaction | `GET /api/v1/txs/{txid}` |
//! | mempool ids | `GET /api/v1/mempool` |
//! | mempool transaction | `GET /api/v1/mempool/{txid}` |
//! | fees | `GET /api/v1/fees/{height}` |
//! | balances | `GET /api/v1/balances/{address}` |
//! | address history | `GET /api/v1/txs?address={address}` |
//!
//! A `404` on a transaction lookup maps to [`ChainError::TransactionNotFound`], which the
//! retry pass treats as permanent.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use url::Url;

use super::http_client::HttpClient;
use super::types::{
    AccountResponse, AddressTransactionsResponse, BlockResponse, FeeResponse, MempoolResponse, TipResponse,
    TransactionResponse,
};
use crate::chain::{ChainError, ChainResult, ChainSource};
use crate::models::{Block, Transaction};

pub struct HttpChainSource {
    http_client: HttpClient,
}

impl HttpChainSource {
    pub fn new(base_url: Url) -> Result<Self, anyhow::Error> {
        let http_client = HttpClient::new(base_url)?;
        Ok(Self { http_client })
    }

    /// # Arguments
    ///
    /// * `max_retries` - Retry attempts for transient failures. Set to 0 to disable retries.
    /// * `timeout` - Maximum duration to wait for a single response
    pub fn with_config(base_url: Url, max_retries: u32, timeout: Duration) -> Result<Self, anyhow::Error> {
        let http_client = HttpClient::with_config(base_url, max_retries, timeout)?;
        Ok(Self { http_client })
    }

    pub fn base_url(&self) -> &Url {
        self.http_client.base_url()
    }

    /// Round-trip time of the most recent gateway request.
    pub async fn latency(&self) -> Option<Duration> {
        self.http_client.get_latency().await
    }

    async fn fees(&self, height: u64) -> ChainResult<FeeResponse> {
        let fees = self.http_client.get(&format!("/api/v1/fees/{}", height)).await?;
        Ok(fees)
    }

    async fn fetch_transaction(&self, path: String, txid: &str) -> ChainResult<Transaction> {
        match self.http_client.get::<TransactionResponse>(&path).await {
            Ok(response) => Ok(response.into()),
            Err(e) if e.is_not_found() => {
                debug!(txid = txid; "Gateway has no record of transaction");
                Err(ChainError::TransactionNotFound(txid.to_string()))
            },
            Err(e) => {
                warn!(txid = txid, error:% = e; "Transaction lookup failed");
                Err(e.into())
            },
        }
    }
}

#[async_trait]
impl ChainSource for HttpChainSource {
    async fn tip_height(&self) -> ChainResult<u64> {
        let tip: TipResponse = self.http_client.get("/api/v1/tip").await?;
        Ok(tip.height)
    }

    async fn block_at(&self, height: u64) -> ChainResult<Block> {
        match self
            .http_client
            .get::<BlockResponse>(&format!("/api/v1/blocks/{}", height))
            .await
        {
            Ok(block) if block.height != height => Err(ChainError::Malformed(format!(
                "requested block {} but gateway returned {}",
                height, block.height
            ))),
            Ok(block) => Ok(block.into()),
            Err(e) if e.is_not_found() => Err(ChainError::BlockNotFound(height)),
            Err(e) => Err(e.into()),
        }
    }

    async fn transaction(&self, txid: &str) -> ChainResult<Transaction> {
        self.fetch_transaction(format!("/api/v1/txs/{}", txid), txid).await
    }

    async fn mempool_tx_ids(&self) -> ChainResult<Vec<String>> {
        let mempool: MempoolResponse = self.http_client.get("/api/v1/mempool").await?;
        Ok(mempool.txids)
    }

    async fn mempool_transaction(&self, txid: &str) -> ChainResult<Transaction> {
        self.fetch_transaction(format!("/api/v1/mempool/{}", txid), txid).await
    }

    async fn fee_at(&self, height: u64) -> ChainResult<u64> {
        Ok(self.fees(height).await?.single)
    }

    async fn multi_fee_at(&self, height: u64) -> ChainResult<u64> {
        Ok(self.fees(height).await?.multi)
    }

    async fn balance_of(&self, address: &str, denom: &str) -> ChainResult<u64> {
        let account: AccountResponse = match self.http_client.get(&format!("/api/v1/balances/{}", address)).await {
            Ok(account) => account,
            // Unknown accounts hold nothing.
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        Ok(account
            .balances
            .iter()
            .find(|b| b.denom == denom)
            .map(|b| b.free)
            .unwrap_or(0))
    }

    async fn transactions_by_address(&self, address: &str) -> ChainResult<Vec<Transaction>> {
        let encoded: String = url::form_urlencoded::byte_serialize(address.as_bytes()).collect();
        let response: AddressTransactionsResponse = self
            .http_client
            .get(&format!("/api/v1/txs?address={}", encoded))
            .await?;
        Ok(response.txs.into_iter().map(Transaction::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn source_for(server: &MockServer) -> HttpChainSource {
        HttpChainSource::with_config(Url::parse(&server.uri()).unwrap(), 0, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_tip_and_block() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"height": 42})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/blocks/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hash": "h42",
                "previous_hash": "h41",
                "height": 42,
                "timestamp": 1700000000,
                "transactions": ["a", "b"]
            })))
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        assert_eq!(source.tip_height().await.unwrap(), 42);

        let block = source.block_at(42).await.unwrap();
        assert_eq!(block.hash(), "h42");
        assert_eq!(block.header.previous_hash, "h41");
        assert_eq!(block.transactions, vec!["a".to_string(), "b".to_string()]);
        assert!(source.latency().await.is_some());
    }

    #[tokio::test]
    async fn test_missing_transaction_is_permanent_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/txs/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        let err = source.transaction("gone").await.unwrap_err();
        assert!(matches!(err, ChainError::TransactionNotFound(ref id) if id == "gone"));
        assert!(err.to_string().starts_with(crate::chain::TX_NOT_FOUND_REASON_PREFIX));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/blocks/7"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        let err = source.block_at(7).await.unwrap_err();
        assert!(matches!(err, ChainError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_fees_and_balances() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/fees/10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"height": 10, "single": 37500, "multi": 30000})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/balances/alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "address": "alice",
                "balances": [{"denom": "BNB", "free": 150000000}]
            })))
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        assert_eq!(source.fee_at(10).await.unwrap(), 37500);
        assert_eq!(source.multi_fee_at(10).await.unwrap(), 30000);
        assert_eq!(source.balance_of("alice", "BNB").await.unwrap(), 150_000_000);
        assert_eq!(source.balance_of("alice", "USDT-6D8").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transactions_by_address() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/txs"))
            .and(query_param("address", "alice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "txs": [{
                    "txid": "t1",
                    "block_height": 3,
                    "inputs": [{"address": "alice", "coins": [{"denom": "BNB", "amount": 1}]}],
                    "outputs": [{"address": "bob", "coins": [{"denom": "BNB", "amount": 1}]}]
                }]
            })))
            .mount(&server)
            .await;

        let source = source_for(&server).await;
        let txs = source.transactions_by_address("alice").await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].groups[0].from[0].address, "alice");
    }
}
