//! Bounded-concurrency extraction of one batch of transactions.
//!
//! ```text
//!   txids ──► producer ──(permit)──► worker × N ──► HandoffQueue ──► consumer ──► NotifySink(s)
//!                 ▲                      │                               │
//!                 └──── Semaphore ◄──────┘ (permit dropped on return)    └──► ScanLedger (failures)
//! ```
//!
//! Fetching and classifying run in parallel, bounded by a semaphore shared by every batch of
//! the pipeline. Delivery is strictly serial: the consumer runs on the caller's task and hands
//! one result at a time to the sinks. The batch is complete once the consumer has seen as many
//! results as transactions were submitted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::{debug, error, warn};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chain::{ChainError, ChainSource};
use crate::db::ScanDbError;
use crate::models::{ExtractedData, OwnerKey, Transaction, UnscannedRecord};
use crate::scan::classifier::{FeeKind, TransactionClassifier};
use crate::scan::events::NotifySink;
use crate::scan::handoff::HandoffQueue;
use crate::scan::ledger::ScanLedger;
use crate::scan::resolver::AddressResolver;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// Some transactions could not be extracted or delivered. They were recorded for retry.
    #[error("{} of {total} transactions at height {height} failed", .failed.len())]
    Incomplete {
        height: u64,
        /// Ids of the transactions that were recorded, in the order they failed.
        failed: Vec<String>,
        total: usize,
    },

    /// A failure could not be recorded. The batch was abandoned.
    #[error("Failed to record unscanned transaction: {0}")]
    Ledger(#[from] ScanDbError),
}

/// Transactions of one block, or of the mempool.
#[derive(Debug, Clone)]
pub struct ExtractBatch {
    /// Height the batch belongs to. Zero for the mempool.
    pub height: u64,
    pub block_hash: String,
    pub txids: Vec<String>,
    pub is_mempool: bool,
}

impl ExtractBatch {
    pub fn block(height: u64, block_hash: impl Into<String>, txids: Vec<String>) -> Self {
        Self {
            height,
            block_hash: block_hash.into(),
            txids,
            is_mempool: false,
        }
    }

    pub fn mempool(txids: Vec<String>) -> Self {
        Self {
            height: 0,
            block_hash: String::new(),
            txids,
            is_mempool: true,
        }
    }
}

/// What one worker made of one transaction.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub txid: String,
    pub block_height: u64,
    pub data: BTreeMap<OwnerKey, ExtractedData>,
    /// Why extraction failed. `None` on success, even if `data` is empty.
    pub failure: Option<String>,
}

impl ExtractionResult {
    fn succeeded(txid: String, block_height: u64, data: BTreeMap<OwnerKey, ExtractedData>) -> Self {
        Self {
            txid,
            block_height,
            data,
            failure: None,
        }
    }

    fn failed(txid: String, block_height: u64, reason: impl Into<String>) -> Self {
        Self {
            txid,
            block_height,
            data: BTreeMap::new(),
            failure: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    /// Owner keys delivered to the sinks.
    pub delivered: usize,
}

#[derive(Clone)]
pub struct ExtractionPipeline {
    chain: Arc<dyn ChainSource>,
    ledger: Arc<dyn ScanLedger>,
    classifier: Arc<TransactionClassifier>,
    sinks: Vec<Arc<dyn NotifySink>>,
    gate: Arc<Semaphore>,
}

impl ExtractionPipeline {
    pub fn new(
        chain: Arc<dyn ChainSource>,
        ledger: Arc<dyn ScanLedger>,
        classifier: Arc<TransactionClassifier>,
        sinks: Vec<Arc<dyn NotifySink>>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            chain,
            ledger,
            classifier,
            sinks,
            gate: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn classifier(&self) -> &TransactionClassifier {
        &self.classifier
    }

    /// Extracts and delivers every transaction of `batch`.
    ///
    /// Every transaction is processed even when some fail. Each failed extraction or delivery
    /// leaves exactly one unscanned record behind, and the call then returns
    /// [`ExtractError::Incomplete`].
    pub async fn extract(
        &self,
        batch: ExtractBatch,
        resolver: Arc<dyn AddressResolver>,
    ) -> Result<BatchSummary, ExtractError> {
        let total = batch.txids.len();
        if total == 0 {
            return Ok(BatchSummary::default());
        }
        debug!(
            height = batch.height,
            txs = total,
            mempool = batch.is_mempool;
            "Extracting batch"
        );

        let queue = Arc::new(HandoffQueue::new());
        let producer = tokio::spawn(Self::produce(
            self.chain.clone(),
            self.classifier.clone(),
            resolver,
            self.gate.clone(),
            queue.clone(),
            batch.clone(),
        ));

        let mut summary = BatchSummary {
            total,
            delivered: 0,
        };
        let mut failed = Vec::new();
        for _ in 0..total {
            let result = queue.pop().await;
            let failure = match result.failure {
                Some(reason) => Some(reason),
                None => self.deliver(&result.data, &mut summary.delivered).await,
            };

            if let Some(reason) = failure {
                warn!(
                    height = batch.height,
                    txid = result.txid.as_str(),
                    reason = reason.as_str();
                    "Transaction not extracted, recording for retry"
                );
                if let Err(e) = self
                    .ledger
                    .save_unscanned(UnscannedRecord::new(batch.height, result.txid.clone(), reason))
                    .await
                {
                    producer.abort();
                    return Err(e.into());
                }
                failed.push(result.txid);
            }
        }

        if let Err(e) = producer.await {
            error!(error:% = e; "Extraction producer failed");
        }

        if !failed.is_empty() {
            Err(ExtractError::Incomplete {
                height: batch.height,
                failed,
                total,
            })
        } else {
            Ok(summary)
        }
    }

    /// Fetches and classifies a single transaction without delivering it.
    pub async fn extract_transaction(
        &self,
        txid: &str,
        height: u64,
        block_hash: &str,
        is_mempool: bool,
        resolver: &dyn AddressResolver,
    ) -> ExtractionResult {
        extract_one(
            self.chain.as_ref(),
            &self.classifier,
            resolver,
            txid.to_string(),
            height,
            block_hash,
            is_mempool,
        )
        .await
    }

    /// Hands every owner key of one result to every sink and returns the first failure.
    ///
    /// A rejection does not hold back the remaining keys or sinks. The transaction is recorded
    /// once for retry regardless of how many deliveries failed.
    async fn deliver(&self, data: &BTreeMap<OwnerKey, ExtractedData>, delivered: &mut usize) -> Option<String> {
        let mut first_failure = None;
        for (owner, extracted) in data {
            let mut accepted = true;
            for sink in &self.sinks {
                if let Err(e) = sink.notify(owner, extracted).await {
                    debug!(owner:% = owner, error:% = e; "Sink rejected extracted data");
                    accepted = false;
                    if first_failure.is_none() {
                        first_failure = Some(format!("notify {} failed: {}", owner, e));
                    }
                }
            }
            if accepted {
                *delivered += 1;
            }
        }
        first_failure
    }

    async fn produce(
        chain: Arc<dyn ChainSource>,
        classifier: Arc<TransactionClassifier>,
        resolver: Arc<dyn AddressResolver>,
        gate: Arc<Semaphore>,
        queue: Arc<HandoffQueue<ExtractionResult>>,
        batch: ExtractBatch,
    ) {
        let ExtractBatch {
            height,
            block_hash,
            txids,
            is_mempool,
        } = batch;
        let block_hash: Arc<str> = Arc::from(block_hash);
        let mut workers = JoinSet::new();
        let mut in_flight = HashMap::new();

        for txid in txids {
            let permit = match gate.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    queue.push(ExtractionResult::failed(txid, height, e.to_string()));
                    continue;
                },
            };

            let chain = chain.clone();
            let classifier = classifier.clone();
            let resolver = resolver.clone();
            let queue = queue.clone();
            let block_hash = block_hash.clone();
            let worker_txid = txid.clone();
            let handle = workers.spawn(async move {
                let result = extract_one(
                    chain.as_ref(),
                    &classifier,
                    resolver.as_ref(),
                    worker_txid,
                    height,
                    &block_hash,
                    is_mempool,
                )
                .await;
                drop(permit);
                queue.push(result);
            });
            in_flight.insert(handle.id(), txid);
        }

        // A worker that panicked never pushed its result.
        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((id, ())) => {
                    in_flight.remove(&id);
                },
                Err(e) => {
                    if let Some(txid) = in_flight.remove(&e.id()) {
                        error!(txid = txid.as_str(), error:% = e; "Extraction worker died");
                        queue.push(ExtractionResult::failed(txid, height, e.to_string()));
                    }
                },
            }
        }
    }
}

/// Fetches one transaction (mempool first when asked, falling back to committed transactions),
/// looks up its fee when an owned sender pays one, then classifies it.
async fn extract_one(
    chain: &dyn ChainSource,
    classifier: &TransactionClassifier,
    resolver: &dyn AddressResolver,
    txid: String,
    height: u64,
    block_hash: &str,
    is_mempool: bool,
) -> ExtractionResult {
    let fetched = if is_mempool {
        match chain.mempool_transaction(&txid).await {
            Ok(tx) => Ok(tx),
            Err(_) => chain.transaction(&txid).await,
        }
    } else {
        chain.transaction(&txid).await
    };

    let mut tx: Transaction = match fetched {
        Ok(tx) => tx,
        Err(e) => return ExtractionResult::failed(txid, height, e.to_string()),
    };
    if tx.block_height == 0 {
        tx.block_height = height;
    }

    let fee = match classifier.fee_payer(&tx, resolver) {
        Some(_) => match fee_for(chain, &tx).await {
            Ok(fee) => Some(fee),
            Err(e) => return ExtractionResult::failed(txid, height, format!("fee lookup failed: {}", e)),
        },
        None => None,
    };

    let data = classifier.classify(&tx, block_hash, resolver, fee);
    ExtractionResult::succeeded(txid, tx.block_height, data)
}

async fn fee_for(chain: &dyn ChainSource, tx: &Transaction) -> Result<u64, ChainError> {
    match TransactionClassifier::fee_kind(tx) {
        FeeKind::Single => chain.fee_at(tx.block_height).await,
        FeeKind::Multi => chain.multi_fee_at(tx.block_height).await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::chain::ChainResult;
    use crate::models::Block;
    use crate::scan::events::NotifyError;
    use crate::scan::ledger::MemoryScanLedger;
    use crate::scan::resolver::WatchList;

    /// Serves transactions from memory and tracks how many fetches overlap.
    #[derive(Default)]
    struct TestChain {
        txs: HashMap<String, Transaction>,
        mempool: HashMap<String, Transaction>,
        unavailable: HashSet<String>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl TestChain {
        fn with_txs(txs: impl IntoIterator<Item = Transaction>) -> Self {
            Self {
                txs: txs.into_iter().map(|tx| (tx.txid.clone(), tx)).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ChainSource for TestChain {
        async fn tip_height(&self) -> ChainResult<u64> {
            Ok(0)
        }

        async fn block_at(&self, height: u64) -> ChainResult<Block> {
            Err(ChainError::BlockNotFound(height))
        }

        async fn transaction(&self, txid: &str) -> ChainResult<Transaction> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.unavailable.contains(txid) {
                return Err(ChainError::Unavailable("connection reset".to_string()));
            }
            self.txs
                .get(txid)
                .cloned()
                .ok_or_else(|| ChainError::TransactionNotFound(txid.to_string()))
        }

        async fn mempool_transaction(&self, txid: &str) -> ChainResult<Transaction> {
            self.mempool
                .get(txid)
                .cloned()
                .ok_or_else(|| ChainError::TransactionNotFound(txid.to_string()))
        }

        async fn fee_at(&self, _height: u64) -> ChainResult<u64> {
            Ok(37_500)
        }

        async fn multi_fee_at(&self, _height: u64) -> ChainResult<u64> {
            Ok(30_000)
        }

        async fn balance_of(&self, _address: &str, _denom: &str) -> ChainResult<u64> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        reject_first: AtomicBool,
        delay: Option<Duration>,
        seen: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl RecordingSink {
        fn rejecting_first_call() -> Self {
            Self {
                reject_first: AtomicBool::new(true),
                ..Default::default()
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotifySink for RecordingSink {
        async fn notify(&self, owner: &OwnerKey, _data: &ExtractedData) -> Result<(), NotifyError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.reject_first.swap(false, Ordering::SeqCst) {
                return Err(NotifyError::Rejected("endpoint said no".to_string()));
            }
            self.seen.lock().unwrap().push(owner.to_string());
            Ok(())
        }
    }

    fn transfer(txid: &str, from: &str, to: &str) -> Transaction {
        let mut tx = Transaction::new(txid, 7);
        tx.add_input("BNB", from, 500);
        tx.add_output("BNB", to, 500);
        tx
    }

    fn watch_list() -> Arc<dyn AddressResolver> {
        let mut list = WatchList::new();
        list.watch("alice", "A").watch("bob", "B");
        Arc::new(list)
    }

    fn pipeline(
        chain: Arc<TestChain>,
        ledger: Arc<MemoryScanLedger>,
        sinks: Vec<Arc<dyn NotifySink>>,
        max_concurrent: usize,
    ) -> ExtractionPipeline {
        ExtractionPipeline::new(
            chain,
            ledger,
            Arc::new(TransactionClassifier::default()),
            sinks,
            max_concurrent,
        )
    }

    fn txids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_rejected_delivery_does_not_hold_back_other_keys_or_sinks() {
        let chain = Arc::new(TestChain::with_txs([transfer("t1", "alice", "bob")]));
        let ledger = Arc::new(MemoryScanLedger::new());
        let flaky = Arc::new(RecordingSink::rejecting_first_call());
        let healthy = Arc::new(RecordingSink::default());
        let sinks: Vec<Arc<dyn NotifySink>> = vec![flaky.clone(), healthy.clone()];
        let pipeline = pipeline(chain, ledger.clone(), sinks, 4);

        let result = pipeline
            .extract(ExtractBatch::block(7, "h7", txids(&["t1"])), watch_list())
            .await;

        match result {
            Err(ExtractError::Incomplete { failed, total, .. }) => {
                assert_eq!(failed, vec!["t1"]);
                assert_eq!(total, 1);
            },
            other => panic!("unexpected extraction result: {:?}", other),
        }
        assert_eq!(healthy.seen(), vec!["BNB:A", "BNB:B", "fee:A"]);
        assert_eq!(flaky.seen(), vec!["BNB:B", "fee:A"]);

        let records = ledger.list_unscanned().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].txid, "t1");
        assert!(records[0].reason.contains("BNB:A"));
    }

    #[tokio::test]
    async fn test_batch_fails_exactly_when_something_was_recorded() {
        let mut chain = TestChain::with_txs([
            transfer("ok1", "carol", "alice"),
            transfer("ok2", "alice", "dave"),
            transfer("foreign", "carol", "dave"),
        ]);
        chain.unavailable.insert("flaky".to_string());
        let ledger = Arc::new(MemoryScanLedger::new());
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(Arc::new(chain), ledger.clone(), vec![sink.clone()], 2);

        let batch = ExtractBatch::block(9, "h9", txids(&["ok1", "flaky", "foreign", "missing", "ok2"]));
        match pipeline.extract(batch, watch_list()).await {
            Err(ExtractError::Incomplete {
                height,
                mut failed,
                total,
            }) => {
                failed.sort();
                assert_eq!(height, 9);
                assert_eq!(failed, vec!["flaky", "missing"]);
                assert_eq!(total, 5);
            },
            other => panic!("unexpected extraction result: {:?}", other),
        }

        let mut recorded: Vec<String> = ledger
            .list_unscanned_at(9)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.txid)
            .collect();
        recorded.sort();
        assert_eq!(recorded, vec!["flaky", "missing"]);

        // A transaction touching no watched address is a success with nothing to deliver.
        let summary = pipeline
            .extract(ExtractBatch::block(10, "h10", txids(&["ok1", "foreign"])), watch_list())
            .await
            .unwrap();
        assert_eq!(summary, BatchSummary { total: 2, delivered: 1 });
        assert!(ledger.list_unscanned_at(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_fetches_never_exceed_the_limit() {
        let ids: Vec<String> = (0..12).map(|i| format!("t{}", i)).collect();
        let mut chain = TestChain::with_txs(ids.iter().map(|id| transfer(id, "carol", "alice")));
        chain.delay = Some(Duration::from_millis(10));
        let chain = Arc::new(chain);
        let pipeline = pipeline(chain.clone(), Arc::new(MemoryScanLedger::new()), vec![], 3);

        let summary = pipeline
            .extract(ExtractBatch::block(5, "h5", ids), watch_list())
            .await
            .unwrap();

        assert_eq!(summary.total, 12);
        assert_eq!(chain.max_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delivery_is_never_concurrent() {
        let ids: Vec<String> = (0..10).map(|i| format!("t{}", i)).collect();
        let chain = Arc::new(TestChain::with_txs(ids.iter().map(|id| transfer(id, "alice", "bob"))));
        let sink = Arc::new(RecordingSink {
            delay: Some(Duration::from_millis(1)),
            ..Default::default()
        });
        let pipeline = pipeline(chain, Arc::new(MemoryScanLedger::new()), vec![sink.clone()], 8);

        let summary = pipeline
            .extract(ExtractBatch::block(5, "h5", ids), watch_list())
            .await
            .unwrap();

        assert_eq!(summary.delivered, 30);
        assert_eq!(sink.seen().len(), 30);
        assert_eq!(sink.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mempool_batch_falls_back_to_committed_transactions() {
        let mut chain = TestChain::with_txs([transfer("confirmed", "carol", "alice")]);
        chain
            .mempool
            .insert("pending".to_string(), transfer("pending", "carol", "bob"));
        let chain = Arc::new(chain);
        let ledger = Arc::new(MemoryScanLedger::new());
        let sink = Arc::new(RecordingSink::default());
        let pipeline = pipeline(chain.clone(), ledger.clone(), vec![sink.clone()], 2);

        let summary = pipeline
            .extract(ExtractBatch::mempool(txids(&["pending", "confirmed"])), watch_list())
            .await
            .unwrap();

        assert_eq!(summary.delivered, 2);
        let mut seen = sink.seen();
        seen.sort();
        assert_eq!(seen, vec!["BNB:A", "BNB:B"]);
        assert!(ledger.list_unscanned().await.unwrap().is_empty());
    }
}
