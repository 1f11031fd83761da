//! The scan-task scheduler: runs scan cycles on an interval and owns the lifecycle state.
//!
//! ```text
//!   Idle ──run──► Running ◄──restart── Paused
//!                   │  ▲                 ▲
//!                   │  └────restart──────┤
//!                   ├───────pause────────┘
//!                   └──stop──► Stopped ──run──► Running
//! ```
//!
//! The engine observes the same state through a `watch` channel and checks it once per advance
//! iteration, so a pause takes effect between blocks, never inside a batch.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::scan::{engine::ScanEngine, types::ScanError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Paused,
    Stopped,
}

pub struct ScanTask {
    engine: Arc<ScanEngine>,
    interval: Duration,
    state: watch::Sender<TaskState>,
    handle: Mutex<Option<JoinHandle<Result<(), ScanError>>>>,
}

impl ScanTask {
    pub fn new(mut engine: ScanEngine, interval: Duration) -> Self {
        let (state, receiver) = watch::channel(TaskState::Idle);
        engine.attach_task_state(receiver);
        Self {
            engine: Arc::new(engine),
            interval,
            state,
            handle: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<ScanEngine> {
        &self.engine
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Starts the periodic loop, or resumes it if it is already alive.
    pub async fn run(&self) {
        self.state.send_replace(TaskState::Running);

        let mut handle = self.handle.lock().await;
        let alive = handle.as_ref().is_some_and(|h| !h.is_finished());
        if !alive {
            info!(interval_secs = self.interval.as_secs(); "Starting scan task");
            *handle = Some(tokio::spawn(scan_loop(
                self.engine.clone(),
                self.state.subscribe(),
                self.interval,
            )));
        }
    }

    /// Pauses after the block currently being scanned.
    pub fn pause(&self) {
        if self.state() == TaskState::Running {
            info!("Pausing scan task");
            self.state.send_replace(TaskState::Paused);
        }
    }

    /// Resumes a paused task. A stopped or idle task is started again.
    pub async fn restart(&self) {
        match self.state() {
            TaskState::Running => {},
            TaskState::Paused => {
                info!("Resuming scan task");
                self.state.send_replace(TaskState::Running);
            },
            TaskState::Idle | TaskState::Stopped => self.run().await,
        }
    }

    /// Stops the loop and waits for the current cycle to wind down.
    pub async fn stop(&self) -> Result<(), ScanError> {
        self.state.send_replace(TaskState::Stopped);
        self.wait().await
    }

    /// Resolves when the loop exits. Without a stop request that only happens on a fatal error.
    ///
    /// Cancel safe: dropping the returned future leaves the loop attached to the task.
    pub async fn wait(&self) -> Result<(), ScanError> {
        let mut handle = self.handle.lock().await;
        let Some(running) = handle.as_mut() else {
            return Ok(());
        };
        let joined = running.await;
        *handle = None;
        joined.map_err(|e| ScanError::Fatal(anyhow::anyhow!("Scan task panicked: {}", e)))?
    }
}

async fn scan_loop(
    engine: Arc<ScanEngine>,
    mut state: watch::Receiver<TaskState>,
    interval: Duration,
) -> Result<(), ScanError> {
    loop {
        let current = *state.borrow_and_update();
        match current {
            TaskState::Stopped => {
                info!("Scan task stopped");
                return Ok(());
            },
            TaskState::Idle | TaskState::Paused => {
                debug!(state:? = current; "Scan task waiting");
                if state.changed().await.is_err() {
                    return Ok(());
                }
                continue;
            },
            TaskState::Running => {},
        }

        match engine.run_scan_cycle().await {
            Ok(report) => {
                debug!(height = report.final_height, blocks = report.blocks_scanned; "Scan cycle done");
            },
            Err(e @ (ScanError::Fatal(_) | ScanError::DbError(_))) => {
                error!(error:% = e; "A fatal error occurred during the scan cycle");
                return Err(e);
            },
            Err(e) => {
                warn!(error:% = e; "An intermittent error occurred during the scan cycle");
            },
        }

        tokio::select! {
            _ = sleep(interval) => {},
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainError, ChainResult, ChainSource};
    use crate::models::{Block, BlockHeader, Transaction};
    use crate::scan::{ChainAsset, MemoryScanLedger, ScanEngineBuilder, ScanLedger};
    use async_trait::async_trait;

    struct StaticChain;

    #[async_trait]
    impl ChainSource for StaticChain {
        async fn tip_height(&self) -> ChainResult<u64> {
            Ok(3)
        }

        async fn block_at(&self, height: u64) -> ChainResult<Block> {
            Ok(Block {
                header: BlockHeader {
                    hash: format!("h{}", height),
                    previous_hash: format!("h{}", height.saturating_sub(1)),
                    height,
                    timestamp: 0,
                },
                transactions: vec![],
            })
        }

        async fn transaction(&self, txid: &str) -> ChainResult<Transaction> {
            Err(ChainError::TransactionNotFound(txid.to_string()))
        }

        async fn fee_at(&self, _height: u64) -> ChainResult<u64> {
            Ok(0)
        }

        async fn multi_fee_at(&self, _height: u64) -> ChainResult<u64> {
            Ok(0)
        }

        async fn balance_of(&self, _address: &str, _denom: &str) -> ChainResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let ledger = Arc::new(MemoryScanLedger::new());
        ledger
            .set_cursor(&crate::models::ScanCursor::new(1, "h1"))
            .await
            .unwrap();
        let engine = ScanEngineBuilder::new(Arc::new(StaticChain), ledger.clone(), ChainAsset::default()).build();
        let task = ScanTask::new(engine, Duration::from_millis(10));
        assert_eq!(task.state(), TaskState::Idle);

        task.run().await;
        assert_eq!(task.state(), TaskState::Running);

        // The first cycle reaches the tip.
        for _ in 0..100 {
            if ledger.get_cursor().await.unwrap().map(|c| c.height) == Some(3) {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(ledger.get_cursor().await.unwrap().unwrap().height, 3);

        task.pause();
        assert_eq!(task.state(), TaskState::Paused);
        task.restart().await;
        assert_eq!(task.state(), TaskState::Running);

        task.stop().await.unwrap();
        assert_eq!(task.state(), TaskState::Stopped);
    }
}
