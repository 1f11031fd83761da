use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::{
    chain::ChainSource,
    scan::{
        ChannelEventSender, EventSender, NoopEventSender, ProcessingEvent,
        classifier::{ChainAsset, TransactionClassifier},
        config::EngineConfig,
        engine::ScanEngine,
        events::{BlockObserver, NotifySink},
        ledger::ScanLedger,
        pipeline::ExtractionPipeline,
        resolver::{AddressResolver, WatchList},
        task::TaskState,
    },
};

/// Builder for a [`ScanEngine`].
///
/// Only the chain source, the ledger and the chain's native asset are required. Everything else
/// has a working default: an empty watch list, no observers or sinks, and [`EngineConfig::default`].
///
/// # Example
///
/// ```rust,ignore
/// let engine = ScanEngine::builder(chain, ledger, ChainAsset::default())
///     .resolver(Arc::new(watch_list))
///     .notify_sink(webhook_sink)
///     .max_concurrent_extractions(8)
///     .rescan_last_block_count(2)
///     .build();
/// ```
pub struct ScanEngineBuilder {
    chain: Arc<dyn ChainSource>,
    ledger: Arc<dyn ScanLedger>,
    asset: ChainAsset,
    resolver: Arc<dyn AddressResolver>,
    observers: Vec<Arc<dyn BlockObserver>>,
    sinks: Vec<Arc<dyn NotifySink>>,
    event_sender: Arc<dyn EventSender>,
    config: EngineConfig,
    task_state: Option<watch::Receiver<TaskState>>,
}

impl ScanEngineBuilder {
    pub fn new(chain: Arc<dyn ChainSource>, ledger: Arc<dyn ScanLedger>, asset: ChainAsset) -> Self {
        Self {
            chain,
            ledger,
            asset,
            resolver: Arc::new(WatchList::new()),
            observers: Vec::new(),
            sinks: Vec::new(),
            event_sender: Arc::new(NoopEventSender),
            config: EngineConfig::default(),
            task_state: None,
        }
    }

    /// Sets the mapping from chain addresses to wallet source keys.
    pub fn resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Adds an observer told about every accepted and abandoned block.
    pub fn observer(mut self, observer: Arc<dyn BlockObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Adds a sink that receives extracted data. Sinks are called in the order they were added.
    pub fn notify_sink(mut self, sink: Arc<dyn NotifySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn event_sender(mut self, sender: Arc<dyn EventSender>) -> Self {
        self.event_sender = sender;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Upper bound on transactions fetched and classified at the same time. Zero is treated as one.
    pub fn max_concurrent_extractions(mut self, max: usize) -> Self {
        self.config.max_concurrent_extractions = max;
        self
    }

    /// Number of blocks below the cursor that are re-extracted after every cycle.
    pub fn rescan_last_block_count(mut self, count: u64) -> Self {
        self.config.rescan_last_block_count = count;
        self
    }

    pub fn scan_mempool(mut self, enabled: bool) -> Self {
        self.config.scan_mempool = enabled;
        self
    }

    /// Lets an external scheduler pause or stop the engine.
    pub fn task_state(mut self, state: watch::Receiver<TaskState>) -> Self {
        self.task_state = Some(state);
        self
    }

    pub fn build(self) -> ScanEngine {
        let classifier = Arc::new(TransactionClassifier::new(self.asset));
        let pipeline = ExtractionPipeline::new(
            self.chain.clone(),
            self.ledger.clone(),
            classifier,
            self.sinks,
            self.config.max_concurrent_extractions,
        );
        let task_state = self.task_state.unwrap_or_else(|| {
            // The sender is dropped here; the receiver keeps reporting `Running`.
            let (_, receiver) = watch::channel(TaskState::Running);
            receiver
        });

        ScanEngine {
            chain: self.chain,
            ledger: self.ledger,
            pipeline,
            resolver: self.resolver,
            observers: self.observers,
            event_sender: self.event_sender,
            config: self.config,
            task_state,
        }
    }

    /// Builds the engine with every event, block notification and extracted record forwarded
    /// onto one unbounded channel.
    pub fn build_with_events(self) -> (mpsc::UnboundedReceiver<ProcessingEvent>, ScanEngine) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(ChannelEventSender::new(tx));
        let engine = self
            .event_sender(channel.clone())
            .observer(channel.clone())
            .notify_sink(channel)
            .build();
        (rx, engine)
    }
}

impl ScanEngine {
    pub fn builder(chain: Arc<dyn ChainSource>, ledger: Arc<dyn ScanLedger>, asset: ChainAsset) -> ScanEngineBuilder {
        ScanEngineBuilder::new(chain, ledger, asset)
    }
}
