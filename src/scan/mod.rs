mod builder;
pub mod classifier;
pub mod config;
pub mod engine;
mod events;
mod handoff;
pub mod ledger;
pub mod pipeline;
mod resolver;
mod scan_db_handler;
pub mod task;
pub mod types;

pub use builder::ScanEngineBuilder;
pub use classifier::{ChainAsset, FeeKind, FeePayer, TransactionClassifier};
pub use config::EngineConfig;
pub use engine::{CycleReport, ScanEngine};
pub use events::{
    BlockObserver, BlockProcessedEvent, ChannelEventSender, DataExtractedEvent, EventSender, NoopEventSender,
    NotifyError, NotifySink, PauseReason, ProcessingEvent, ScanStatusEvent,
};
pub use handoff::HandoffQueue;
pub use ledger::{MemoryScanLedger, ScanLedger};
pub use pipeline::{BatchSummary, ExtractBatch, ExtractError, ExtractionPipeline, ExtractionResult};
pub use resolver::{AddressResolver, WatchEntry, WatchList};
pub use scan_db_handler::ScanDbHandler;
pub use task::{ScanTask, TaskState};
pub use types::ScanError;
