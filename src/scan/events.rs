//! Event types and subscriber traits for scanner notifications.
//!
//! The scanner talks to the outside world through three seams:
//!
//! - [`BlockObserver`]: told about every accepted block and every abandoned (forked) block
//! - [`NotifySink`]: receives the extracted data of each owner key, one delivery at a time
//! - [`EventSender`]: a fire-and-forget stream of [`ProcessingEvent`]s (status, progress)
//!
//! [`ChannelEventSender`] implements all three by forwarding onto one unbounded channel, which
//! makes it the natural subscriber for UIs and for tests that assert on exact call sequences.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use tokio::sync::mpsc;
//! use crate::scan::{ChannelEventSender, ProcessingEvent};
//!
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let sender = ChannelEventSender::new(tx);
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         ProcessingEvent::BlockProcessed(e) => {
//!             println!("Block {} (fork: {})", e.header.height, e.is_fork);
//!         }
//!         ProcessingEvent::DataExtracted(e) => {
//!             println!("Data for {}", e.owner);
//!         }
//!         ProcessingEvent::ScanStatus(s) => {
//!             println!("Status: {:?}", s);
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{BlockHeader, ExtractedData, OwnerKey};

/// Top-level event enum for all scanner notifications.
#[derive(Debug, Clone)]
pub enum ProcessingEvent {
    /// A block was accepted, or abandoned because of a fork.
    BlockProcessed(BlockProcessedEvent),

    /// Data for one owner key was extracted from a transaction.
    DataExtracted(DataExtractedEvent),

    /// Scan status has changed (started, progress, fork, completed, paused).
    ScanStatus(ScanStatusEvent),
}

#[derive(Debug, Clone)]
pub struct BlockProcessedEvent {
    pub header: BlockHeader,
    pub is_fork: bool,
}

#[derive(Debug, Clone)]
pub struct DataExtractedEvent {
    pub owner: OwnerKey,
    pub data: ExtractedData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatusEvent {
    Started {
        from_height: u64,
    },
    Progress {
        current_height: u64,
        blocks_scanned: u64,
    },
    ForkDetected {
        abandoned_height: u64,
        rewound_to: u64,
    },
    Completed {
        final_height: u64,
        total_blocks_scanned: u64,
    },
    Paused {
        last_scanned_height: u64,
        reason: PauseReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseReason {
    Paused,
    Stopped,
}

pub trait EventSender: Send + Sync {
    fn send(&self, event: ProcessingEvent) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct NoopEventSender;

impl EventSender for NoopEventSender {
    fn send(&self, _event: ProcessingEvent) -> bool {
        true
    }
}

/// Subscriber for block-level events.
pub trait BlockObserver: Send + Sync {
    /// Fired once per accepted block (`is_fork == false`) and once per abandoned block.
    fn on_new_block(&self, header: &BlockHeader, is_fork: bool);
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Delivery transport failed: {0}")]
    Transport(String),

    #[error("Notification channel closed")]
    Closed,
}

/// Receiver of extracted wallet data.
///
/// Called once per owner key per processed transaction, in submission order, and never
/// concurrently within a batch. An error marks the transaction for retry.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn notify(&self, owner: &OwnerKey, data: &ExtractedData) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone)]
pub struct ChannelEventSender {
    sender: tokio::sync::mpsc::UnboundedSender<ProcessingEvent>,
}

impl ChannelEventSender {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<ProcessingEvent>) -> Self {
        Self { sender }
    }
}

impl EventSender for ChannelEventSender {
    fn send(&self, event: ProcessingEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

impl BlockObserver for ChannelEventSender {
    fn on_new_block(&self, header: &BlockHeader, is_fork: bool) {
        self.send(ProcessingEvent::BlockProcessed(BlockProcessedEvent {
            header: header.clone(),
            is_fork,
        }));
    }
}

#[async_trait]
impl NotifySink for ChannelEventSender {
    async fn notify(&self, owner: &OwnerKey, data: &ExtractedData) -> Result<(), NotifyError> {
        let delivered = self.send(ProcessingEvent::DataExtracted(DataExtractedEvent {
            owner: owner.clone(),
            data: data.clone(),
        }));
        if delivered { Ok(()) } else { Err(NotifyError::Closed) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sender_reports_closed_channel() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sender = ChannelEventSender::new(tx);

        let owner = OwnerKey::asset("BNB", "acc");
        assert!(sender.notify(&owner, &ExtractedData::default()).await.is_ok());

        drop(rx);
        let err = sender.notify(&owner, &ExtractedData::default()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Closed));
    }
}
