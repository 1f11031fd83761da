//! Data models shared by the scanner, the ledger and the chain source.
//!
//! # Key Types
//!
//! - [`BlockHeader`] / [`Block`] - Blocks as reported by the chain source and cached locally
//! - [`ScanCursor`] - The last fully processed block (height + hash)
//! - [`UnscannedRecord`] - A durable marker that a block or transaction must be retried
//! - [`Transaction`] - A decoded transfer, grouped per denomination
//! - [`ExtractedData`] - Owner-attributed inputs, outputs and summary for one transaction
//! - [`OwnerKey`] - The (denomination or fee bucket, source key) pair extracted data is keyed by

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod extract;
pub use extract::{Coin, ExtractedData, TransactionSummary, TxInput, TxOutput, TxStatus, TxType};
pub mod owner_key;
pub use owner_key::{OwnerBucket, OwnerKey};

/// Header of a block as reported by the chain source. Identity is the hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub previous_hash: String,
    pub height: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
}

/// A block together with the ordered ids of the transactions it commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<String>,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> &str {
        &self.header.hash
    }
}

/// The last block that was fully processed by the scan engine.
///
/// A height of zero means nothing has been scanned yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCursor {
    pub height: u64,
    pub hash: String,
}

impl ScanCursor {
    pub fn new(height: u64, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }
}

impl From<&BlockHeader> for ScanCursor {
    fn from(header: &BlockHeader) -> Self {
        Self::new(header.height, header.hash.clone())
    }
}

/// A block or transaction whose extraction (or delivery) failed and must be retried.
///
/// An empty `txid` marks a block-level failure: the retry pass re-fetches the whole block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnscannedRecord {
    pub id: String,
    pub height: u64,
    pub txid: String,
    pub reason: String,
}

impl UnscannedRecord {
    pub fn new(height: u64, txid: impl Into<String>, reason: impl Into<String>) -> Self {
        let txid = txid.into();
        Self {
            id: Self::record_id(height, &txid),
            height,
            txid,
            reason: reason.into(),
        }
    }

    /// Deterministic record id, so that saving the same (height, txid) twice replaces the entry.
    pub fn record_id(height: u64, txid: &str) -> String {
        hex::encode(Sha256::digest(format!("{}_{}", height, txid).as_bytes()))
    }

    pub fn is_block_level(&self) -> bool {
        self.txid.is_empty()
    }
}

/// An address and the amount it sent or received, in the smallest unit of the denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrAmount {
    pub address: String,
    pub amount: u64,
}

impl AddrAmount {
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }

    /// `address:amount`, as used in transaction summaries.
    pub fn pair(&self) -> String {
        format!("{}:{}", self.address, self.amount)
    }
}

/// All movements of one denomination inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferGroup {
    pub denom: String,
    pub from: Vec<AddrAmount>,
    pub to: Vec<AddrAmount>,
}

impl TransferGroup {
    pub fn new(denom: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            from: Vec::new(),
            to: Vec::new(),
        }
    }

    pub fn is_multi_party(&self) -> bool {
        self.from.len() > 1 || self.to.len() > 1
    }
}

/// A decoded transaction: one [`TransferGroup`] per denomination, in order of first appearance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    /// Zero while the transaction is still in the mempool.
    pub block_height: u64,
    pub memo: String,
    pub groups: Vec<TransferGroup>,
}

impl Transaction {
    pub fn new(txid: impl Into<String>, block_height: u64) -> Self {
        Self {
            txid: txid.into(),
            block_height,
            memo: String::new(),
            groups: Vec::new(),
        }
    }

    /// Returns the group for `denom`, creating it at the end if it does not exist yet.
    pub fn group_mut(&mut self, denom: &str) -> &mut TransferGroup {
        let index = match self.groups.iter().position(|g| g.denom == denom) {
            Some(index) => index,
            None => {
                self.groups.push(TransferGroup::new(denom));
                self.groups.len() - 1
            },
        };
        &mut self.groups[index]
    }

    pub fn add_input(&mut self, denom: &str, address: impl Into<String>, amount: u64) {
        self.group_mut(denom).from.push(AddrAmount::new(address, amount));
    }

    pub fn add_output(&mut self, denom: &str, address: impl Into<String>, amount: u64) {
        self.group_mut(denom).to.push(AddrAmount::new(address, amount));
    }
}

/// Balance of an address in a given asset, formatted with the asset's decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub address: String,
    pub symbol: String,
    pub balance: String,
}

/// Formats an amount in the smallest unit as a decimal string, trimming trailing zeros.
pub fn format_amount(amount: u64, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let (whole, fraction) = match 10u128.checked_pow(decimals) {
        Some(divisor) => (u128::from(amount) / divisor, u128::from(amount) % divisor),
        // More decimals than any u64 has digits.
        None => (0, u128::from(amount)),
    };
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{:0width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscanned_record_id_is_deterministic() {
        let a = UnscannedRecord::new(100, "abc", "first");
        let b = UnscannedRecord::new(100, "abc", "second");
        let c = UnscannedRecord::new(100, "", "block");

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 64);
        assert!(c.is_block_level());
    }

    #[test]
    fn test_groups_keep_first_appearance_order() {
        let mut tx = Transaction::new("tx1", 5);
        tx.add_input("USDT-6D8", "alice", 10);
        tx.add_input("BNB", "alice", 1);
        tx.add_output("USDT-6D8", "bob", 10);
        tx.add_output("BNB", "carol", 1);

        let denoms: Vec<_> = tx.groups.iter().map(|g| g.denom.as_str()).collect();
        assert_eq!(denoms, vec!["USDT-6D8", "BNB"]);
        assert_eq!(tx.groups[0].to[0].pair(), "bob:10");
        assert!(!tx.groups[1].is_multi_party());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(150_000_000, 8), "1.5");
        assert_eq!(format_amount(100_000_000, 8), "1");
        assert_eq!(format_amount(1, 8), "0.00000001");
        assert_eq!(format_amount(42, 0), "42");
    }

    #[test]
    fn test_format_amount_with_oversized_decimals() {
        assert_eq!(format_amount(5, 40), format!("0.{}5", "0".repeat(39)));
        assert_eq!(format_amount(0, 40), "0");
        assert_eq!(format_amount(u64::MAX, 38), format!("0.{:0>38}", u64::MAX));
    }
}
