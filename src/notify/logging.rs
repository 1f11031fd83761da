use async_trait::async_trait;
use log::info;

use crate::{
    log::mask_address,
    models::{BlockHeader, ExtractedData, OwnerKey},
    scan::{BlockObserver, NotifyError, NotifySink},
};

/// Writes blocks and extracted data to the log. Never fails.
#[derive(Debug, Clone, Default)]
pub struct LoggingObserver;

impl BlockObserver for LoggingObserver {
    fn on_new_block(&self, header: &BlockHeader, is_fork: bool) {
        if is_fork {
            info!(height = header.height, hash = header.hash.as_str(); "Block abandoned by fork");
        } else {
            info!(height = header.height, hash = header.hash.as_str(); "Block scanned");
        }
    }
}

#[async_trait]
impl NotifySink for LoggingObserver {
    async fn notify(&self, owner: &OwnerKey, data: &ExtractedData) -> Result<(), NotifyError> {
        for input in &data.inputs {
            info!(
                owner:% = owner,
                txid = input.txid.as_str(),
                address = mask_address(&input.address).as_str(),
                amount = input.amount;
                "Input extracted"
            );
        }
        for output in &data.outputs {
            info!(
                owner:% = owner,
                txid = output.txid.as_str(),
                address = mask_address(&output.address).as_str(),
                amount = output.amount;
                "Output extracted"
            );
        }
        if let Some(summary) = &data.transaction {
            info!(
                owner:% = owner,
                txid = summary.txid.as_str(),
                tx_type:? = summary.tx_type,
                fees = summary.fees;
                "Transaction extracted"
            );
        }
        Ok(())
    }
}
