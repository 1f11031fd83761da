//! The fork-aware height walker.
//!
//! One call to [`ScanEngine::run_scan_cycle`] goes through three phases:
//!
//! 1. **Advancing**: fetch `cursor + 1`, compare its previous hash with the cursor, accept it
//!    (extract, persist, notify) and repeat until the tip is reached.
//! 2. **Fork resolving**: on a previous-hash mismatch, rewind the cursor by exactly one block,
//!    notify observers of the abandoned block if it is cached and go back to advancing. Deep
//!    reorganizations are walked back one ancestor per iteration.
//! 3. **Draining**: re-extract the most recent blocks, optionally the mempool, then retry the
//!    unscanned records.
//!
//! The task state is polled once per advance iteration; an in-flight batch always completes
//! before a pause or stop takes effect. Only one cycle may run at a time per ledger.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::{
    chain::{ChainSource, TX_NOT_FOUND_REASON_PREFIX},
    log::mask_address,
    models::{Balance, Block, BlockHeader, ExtractedData, OwnerKey, ScanCursor, UnscannedRecord, format_amount},
    scan::{
        classifier::{FeeKind, TransactionClassifier},
        config::{EngineConfig, MIN_REWIND_HEIGHT},
        events::{BlockObserver, EventSender, PauseReason, ProcessingEvent, ScanStatusEvent},
        ledger::ScanLedger,
        pipeline::{ExtractBatch, ExtractError, ExtractionPipeline},
        resolver::AddressResolver,
        task::TaskState,
        types::ScanError,
    },
};

/// What a scan cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub start_height: u64,
    pub final_height: u64,
    pub blocks_scanned: u64,
    /// Rewind steps taken, one per abandoned block.
    pub forks: u64,
    /// Heights re-extracted by the retry pass.
    pub retried_heights: usize,
    /// Permanently failed records purged by the retry pass.
    pub purged_records: usize,
    /// Set when the cycle ended early because the task was paused or stopped.
    pub interrupted: bool,
}

pub struct ScanEngine {
    pub(crate) chain: Arc<dyn ChainSource>,
    pub(crate) ledger: Arc<dyn ScanLedger>,
    pub(crate) pipeline: ExtractionPipeline,
    pub(crate) resolver: Arc<dyn AddressResolver>,
    pub(crate) observers: Vec<Arc<dyn BlockObserver>>,
    pub(crate) event_sender: Arc<dyn EventSender>,
    pub(crate) config: EngineConfig,
    pub(crate) task_state: watch::Receiver<TaskState>,
}

impl ScanEngine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn ScanLedger> {
        &self.ledger
    }

    /// Lets a scheduler pause or stop the advance loop.
    pub fn attach_task_state(&mut self, state: watch::Receiver<TaskState>) {
        self.task_state = state;
    }

    fn current_task_state(&self) -> TaskState {
        *self.task_state.borrow()
    }

    /// Runs one full cycle: advance to the tip, then drain.
    pub async fn run_scan_cycle(&self) -> Result<CycleReport, ScanError> {
        let mut cursor = match self.scanned_block_header().await {
            Ok(cursor) => cursor,
            Err(ScanError::Chain(e)) => {
                warn!(error:% = e; "Cannot determine where to start scanning, skipping cycle");
                return Ok(CycleReport::default());
            },
            Err(e) => return Err(e),
        };

        let mut report = CycleReport {
            start_height: cursor.height,
            final_height: cursor.height,
            ..Default::default()
        };
        self.event_sender.send(ProcessingEvent::ScanStatus(ScanStatusEvent::Started {
            from_height: cursor.height,
        }));

        loop {
            let state = self.current_task_state();
            if state != TaskState::Running {
                let reason = match state {
                    TaskState::Stopped => PauseReason::Stopped,
                    _ => PauseReason::Paused,
                };
                info!(height = cursor.height, state:? = state; "Scan interrupted");
                self.event_sender.send(ProcessingEvent::ScanStatus(ScanStatusEvent::Paused {
                    last_scanned_height: cursor.height,
                    reason,
                }));
                report.final_height = cursor.height;
                report.interrupted = true;
                return Ok(report);
            }

            let tip = match self.chain.tip_height().await {
                Ok(tip) => tip,
                Err(e) => {
                    warn!(error:% = e; "Cannot get chain tip, stopping advance");
                    break;
                },
            };
            if cursor.height >= tip {
                debug!(height = cursor.height, tip = tip; "Scanner caught up with the chain tip");
                break;
            }

            let next_height = cursor.height + 1;
            let block = match self.chain.block_at(next_height).await {
                Ok(block) => block,
                Err(e) => {
                    warn!(height = next_height, error:% = e; "Cannot get block, stopping advance");
                    break;
                },
            };

            // A cursor at height zero has no scanned predecessor to compare against.
            if cursor.height > 0 && block.header.previous_hash != cursor.hash {
                info!(
                    height = next_height,
                    expected_previous = cursor.hash.as_str(),
                    declared_previous = block.header.previous_hash.as_str();
                    "Block does not extend the scanned chain, rewinding"
                );
                match self.rewind(&cursor).await? {
                    Some(rewound) => {
                        cursor = rewound;
                        report.forks += 1;
                        continue;
                    },
                    None => break,
                }
            }

            self.accept_block(&block).await?;
            cursor = ScanCursor::from(&block.header);
            report.blocks_scanned += 1;
            self.event_sender.send(ProcessingEvent::ScanStatus(ScanStatusEvent::Progress {
                current_height: cursor.height,
                blocks_scanned: report.blocks_scanned,
            }));
        }

        report.final_height = cursor.height;
        self.event_sender.send(ProcessingEvent::ScanStatus(ScanStatusEvent::Completed {
            final_height: cursor.height,
            total_blocks_scanned: report.blocks_scanned,
        }));

        self.rescan_last_blocks(&cursor).await?;

        if self.config.scan_mempool {
            self.scan_mempool().await?;
        }

        let (retried, purged) = self.rescan_failed().await?;
        report.retried_heights = retried;
        report.purged_records = purged;

        info!(
            from = report.start_height,
            to = report.final_height,
            blocks = report.blocks_scanned,
            forks = report.forks;
            "Scan cycle finished"
        );
        Ok(report)
    }

    /// Single-step rewind. Returns the new cursor, or `None` if the ancestor could not be fetched.
    async fn rewind(&self, cursor: &ScanCursor) -> Result<Option<ScanCursor>, ScanError> {
        let previous_height = cursor.height;
        let deleted = self.ledger.delete_unscanned(previous_height).await?;
        if deleted > 0 {
            debug!(height = previous_height, count = deleted; "Dropped unscanned records of abandoned block");
        }

        let target = previous_height.saturating_sub(1).max(MIN_REWIND_HEIGHT);

        let abandoned = self.ledger.get_block(previous_height).await?.map(|block| block.header);

        // When clamped, the cached block at the target is the abandoned one.
        let cached = if target == previous_height {
            None
        } else {
            self.ledger.get_block(target).await?
        };
        let ancestor = match cached {
            Some(block) => block,
            None => match self.chain.block_at(target).await {
                Ok(block) => {
                    self.ledger.put_block(&block).await?;
                    block
                },
                Err(e) => {
                    warn!(height = target, error:% = e; "Cannot get rewind target block");
                    return Ok(None);
                },
            },
        };

        let rewound = ScanCursor::from(&ancestor.header);
        self.ledger.set_cursor(&rewound).await?;

        // Observers only hear about abandoned blocks whose header is known.
        match &abandoned {
            Some(header) => self.notify_observers(header, true),
            None => debug!(height = previous_height; "Abandoned block not cached, observers not notified"),
        }
        self.event_sender.send(ProcessingEvent::ScanStatus(ScanStatusEvent::ForkDetected {
            abandoned_height: previous_height,
            rewound_to: rewound.height,
        }));
        info!(abandoned = previous_height, rewound_to = rewound.height; "Rewound scan cursor");

        Ok(Some(rewound))
    }

    async fn accept_block(&self, block: &Block) -> Result<(), ScanError> {
        info!(height = block.height(), txs = block.transactions.len(); "Scanning block");

        self.run_batch(ExtractBatch::block(
            block.height(),
            block.hash(),
            block.transactions.clone(),
        ))
        .await?;

        self.ledger.set_cursor(&ScanCursor::from(&block.header)).await?;
        self.ledger.put_block(block).await?;
        self.notify_observers(&block.header, false);
        Ok(())
    }

    /// Runs one batch and returns the ids of the transactions that failed.
    ///
    /// Partial failures are already recorded by the pipeline and only logged here.
    async fn run_batch(&self, batch: ExtractBatch) -> Result<Vec<String>, ScanError> {
        let height = batch.height;
        match self.pipeline.extract(batch, self.resolver.clone()).await {
            Ok(summary) => {
                debug!(height = height, txs = summary.total, delivered = summary.delivered; "Batch extracted");
                Ok(Vec::new())
            },
            Err(ExtractError::Incomplete { failed, total, .. }) => {
                warn!(height = height, failed = failed.len(), total = total; "Batch extraction incomplete");
                Ok(failed)
            },
            Err(ExtractError::Ledger(e)) => Err(ScanError::DbError(e)),
        }
    }

    fn notify_observers(&self, header: &BlockHeader, is_fork: bool) {
        for observer in &self.observers {
            observer.on_new_block(header, is_fork);
        }
    }

    /// Re-extracts the blocks just below the cursor, unconditionally.
    async fn rescan_last_blocks(&self, cursor: &ScanCursor) -> Result<(), ScanError> {
        let count = self.config.rescan_last_block_count;
        for height in cursor.height.saturating_sub(count)..cursor.height {
            if height == 0 {
                continue;
            }
            match self.chain.block_at(height).await {
                Ok(block) => {
                    debug!(height = height; "Re-extracting recent block");
                    self.run_batch(ExtractBatch::block(height, block.hash(), block.transactions.clone()))
                        .await?;
                },
                Err(e) => {
                    warn!(height = height, error:% = e; "Cannot re-fetch recent block");
                    self.ledger
                        .save_unscanned(UnscannedRecord::new(height, "", e.to_string()))
                        .await?;
                },
            }
        }
        Ok(())
    }

    async fn scan_mempool(&self) -> Result<(), ScanError> {
        let txids = match self.chain.mempool_tx_ids().await {
            Ok(txids) => txids,
            Err(e) => {
                warn!(error:% = e; "Cannot list mempool transactions");
                return Ok(());
            },
        };
        debug!(count = txids.len(); "Scanning mempool");
        self.run_batch(ExtractBatch::mempool(txids)).await?;
        Ok(())
    }

    /// The retry pass. Returns the number of heights retried and of records purged.
    ///
    /// Records the node reports as unknown are purged first and never retried. The remaining
    /// records are grouped by height and each height is re-extracted as a whole. A record is
    /// only deleted once its transaction went through; failures that persist are saved again
    /// with their current reason.
    pub async fn rescan_failed(&self) -> Result<(usize, usize), ScanError> {
        let purged = self
            .ledger
            .delete_unscanned_by_reason_prefix(TX_NOT_FOUND_REASON_PREFIX)
            .await?;
        if purged > 0 {
            info!(count = purged; "Purged unscanned records of unknown transactions");
        }

        let mut by_height: BTreeMap<u64, Vec<UnscannedRecord>> = BTreeMap::new();
        for record in self.ledger.list_unscanned().await? {
            by_height.entry(record.height).or_default().push(record);
        }

        let mut retried = 0;
        for (height, records) in by_height {
            if height == 0 {
                self.ledger.delete_unscanned(0).await?;
                continue;
            }

            let batch = if records.iter().any(UnscannedRecord::is_block_level) {
                match self.chain.block_at(height).await {
                    Ok(block) => ExtractBatch::block(height, block.hash(), block.transactions.clone()),
                    Err(e) => {
                        warn!(height = height, error:% = e; "Cannot re-fetch block for retry");
                        continue;
                    },
                }
            } else {
                let txids = records.iter().map(|r| r.txid.clone()).collect();
                ExtractBatch::block(height, self.resolve_block_hash(height).await?, txids)
            };

            info!(height = height, txs = batch.txids.len(); "Retrying unscanned records");
            let still_failing: HashSet<String> = self.run_batch(batch).await?.into_iter().collect();
            for record in records.iter().filter(|r| !still_failing.contains(&r.txid)) {
                self.ledger.delete_unscanned_record(height, &record.txid).await?;
            }
            retried += 1;
        }

        Ok((retried, purged))
    }

    /// Hash of the block at `height`: from the cache, else from the chain, else empty.
    async fn resolve_block_hash(&self, height: u64) -> Result<String, ScanError> {
        if height == 0 {
            return Ok(String::new());
        }
        if let Some(block) = self.ledger.get_block(height).await? {
            return Ok(block.header.hash);
        }
        match self.chain.block_hash(height).await {
            Ok(hash) => Ok(hash),
            Err(e) => {
                debug!(height = height, error:% = e; "Block hash unavailable");
                Ok(String::new())
            },
        }
    }

    /// Moves the cursor so that the next cycle starts scanning at `height`.
    pub async fn set_rescan_height(&self, height: u64) -> Result<ScanCursor, ScanError> {
        if height <= MIN_REWIND_HEIGHT {
            return Err(ScanError::InvalidHeight(height));
        }
        let target = height - 1;
        let hash = self.chain.block_hash(target).await?;
        let cursor = ScanCursor::new(target, hash);
        self.ledger.set_cursor(&cursor).await?;
        let dropped = self.ledger.delete_blocks_above(target).await?;
        info!(height = height, dropped_blocks = dropped; "Scan cursor moved for rescan");
        Ok(cursor)
    }

    /// Extracts one block without moving the cursor.
    ///
    /// A block that cannot be fetched is recorded as a block-level unscanned record.
    pub async fn scan_block(&self, height: u64) -> Result<BlockHeader, ScanError> {
        let block = match self.chain.block_at(height).await {
            Ok(block) => block,
            Err(e) => {
                self.ledger
                    .save_unscanned(UnscannedRecord::new(height, "", e.to_string()))
                    .await?;
                return Err(e.into());
            },
        };

        self.run_batch(ExtractBatch::block(height, block.hash(), block.transactions.clone()))
            .await?;
        self.notify_observers(&block.header, false);
        Ok(block.header)
    }

    /// Header of the chain's current best block.
    pub async fn current_block_header(&self) -> Result<BlockHeader, ScanError> {
        let tip = self.chain.tip_height().await?;
        Ok(self.chain.block_at(tip).await?.header)
    }

    /// The persisted cursor. Without one, scanning starts just below the current tip.
    pub async fn scanned_block_header(&self) -> Result<ScanCursor, ScanError> {
        if let Some(cursor) = self.ledger.get_cursor().await?.filter(|c| !c.is_empty()) {
            return Ok(cursor);
        }

        let tip = self.chain.tip_height().await?;
        let height = tip.saturating_sub(1);
        let hash = if height == 0 {
            String::new()
        } else {
            self.chain.block_hash(height).await?
        };
        debug!(height = height; "No scan cursor, starting below the chain tip");
        Ok(ScanCursor::new(height, hash))
    }

    pub async fn scanned_block_height(&self) -> Result<u64, ScanError> {
        Ok(self.scanned_block_header().await?.height)
    }

    /// Classifies one transaction against `resolver` without delivering it anywhere.
    pub async fn extract_transaction_data(
        &self,
        txid: &str,
        resolver: &dyn AddressResolver,
    ) -> Result<BTreeMap<OwnerKey, Vec<ExtractedData>>, ScanError> {
        let result = self.pipeline.extract_transaction(txid, 0, "", false, resolver).await;
        if let Some(reason) = result.failure {
            return Err(ScanError::Extraction {
                txid: txid.to_string(),
                reason,
            });
        }

        let block_hash = self.resolve_block_hash(result.block_height).await?;
        Ok(result
            .data
            .into_iter()
            .map(|(owner, mut data)| {
                set_block_hash(&mut data, &block_hash);
                (owner, vec![data])
            })
            .collect())
    }

    /// History of `addresses`, classified as if the wallet owned exactly those addresses.
    ///
    /// Each address is its own source key.
    pub async fn transactions_by_address(
        &self,
        addresses: &[String],
    ) -> Result<BTreeMap<OwnerKey, Vec<ExtractedData>>, ScanError> {
        let owned: HashSet<String> = addresses.iter().cloned().collect();
        let resolver = move |address: &str| owned.get(address).cloned();
        let classifier = self.pipeline.classifier();

        let mut seen = HashSet::new();
        let mut extracted: BTreeMap<OwnerKey, Vec<ExtractedData>> = BTreeMap::new();
        for address in addresses {
            debug!(address = mask_address(address).as_str(); "Fetching address history");
            for tx in self.chain.transactions_by_address(address).await? {
                if !seen.insert(tx.txid.clone()) {
                    continue;
                }
                let fee = match classifier.fee_payer(&tx, &resolver) {
                    Some(_) => Some(match TransactionClassifier::fee_kind(&tx) {
                        FeeKind::Single => self.chain.fee_at(tx.block_height).await?,
                        FeeKind::Multi => self.chain.multi_fee_at(tx.block_height).await?,
                    }),
                    None => None,
                };
                let block_hash = self.resolve_block_hash(tx.block_height).await?;
                for (owner, data) in classifier.classify(&tx, &block_hash, &resolver, fee) {
                    extracted.entry(owner).or_default().push(data);
                }
            }
        }
        Ok(extracted)
    }

    /// Native-asset balances of `addresses`, formatted with the asset's decimals.
    pub async fn balances_by_address(&self, addresses: &[String]) -> Result<Vec<Balance>, ScanError> {
        let asset = self.pipeline.classifier().asset();
        let mut balances = Vec::with_capacity(addresses.len());
        for address in addresses {
            let amount = self.chain.balance_of(address, &asset.native_denom).await?;
            balances.push(Balance {
                address: address.clone(),
                symbol: asset.symbol.clone(),
                balance: format_amount(amount, asset.decimals),
            });
        }
        Ok(balances)
    }
}

fn set_block_hash(data: &mut ExtractedData, block_hash: &str) {
    for input in &mut data.inputs {
        input.block_hash = block_hash.to_string();
    }
    for output in &mut data.outputs {
        output.block_hash = block_hash.to_string();
    }
    if let Some(summary) = &mut data.transaction {
        summary.block_hash = block_hash.to_string();
    }
}
