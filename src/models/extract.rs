//! Owner-attributed records produced by transaction classification.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    #[default]
    Transfer,
    FeeCharge,
}

impl TxType {
    pub fn code(&self) -> u8 {
        match self {
            TxType::Transfer => 0,
            TxType::FeeCharge => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    #[default]
    Success,
    Failed,
}

/// The asset a record is denominated in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Chain symbol, e.g. `BNB`.
    pub symbol: String,
    /// Denomination on chain, e.g. `BNB` or `USDT-6D8`.
    pub denom: String,
    pub contract_id: String,
    pub name: String,
    pub decimals: u32,
}

impl Coin {
    pub fn new(symbol: &str, denom: &str, name: &str, decimals: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            denom: denom.to_string(),
            contract_id: Self::contract_id(symbol, denom),
            name: name.to_string(),
            decimals,
        }
    }

    /// Synthetic contract identifier for a denomination of the chain.
    pub fn contract_id(symbol: &str, denom: &str) -> String {
        sha256_hex(&format!("{}_{}", symbol, denom))
    }
}

/// Value leaving an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub sid: String,
    pub txid: String,
    pub index: u64,
    pub address: String,
    pub amount: u64,
    pub coin: Coin,
    pub block_height: u64,
    pub block_hash: String,
    pub memo: String,
    pub tx_type: TxType,
}

impl TxInput {
    pub fn sid(txid: &str, symbol: &str, denom: &str, index: u64) -> String {
        sha256_hex(&format!("input_{}_{}_{}_{}", txid, symbol, denom, index))
    }
}

/// Value arriving at an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub sid: String,
    pub txid: String,
    pub index: u64,
    pub address: String,
    pub amount: u64,
    pub coin: Coin,
    pub block_height: u64,
    pub block_hash: String,
    pub memo: String,
}

impl TxOutput {
    pub fn sid(txid: &str, symbol: &str, denom: &str, index: u64) -> String {
        sha256_hex(&format!("output_{}_{}_{}_{}", txid, symbol, denom, index))
    }
}

/// Canonical view of a transaction from one owner's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub wx_id: String,
    pub txid: String,
    /// `address:amount` pairs.
    pub from: Vec<String>,
    /// `address:amount` pairs.
    pub to: Vec<String>,
    /// Only set for fee charges.
    pub amount: Option<u64>,
    pub fees: u64,
    pub coin: Coin,
    pub block_height: u64,
    pub block_hash: String,
    pub status: TxStatus,
    pub memo: String,
    pub tx_type: TxType,
}

impl TransactionSummary {
    /// Derives the wallet-side id from the fields that identify the movement.
    pub fn with_wx_id(mut self) -> Self {
        self.wx_id = sha256_hex(&format!(
            "{}_{}_{}_{}_{}",
            self.txid,
            self.coin.contract_id,
            self.tx_type.code(),
            self.from.join(","),
            self.to.join(",")
        ));
        self
    }
}

/// Everything one transaction means for one owner key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedData {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub transaction: Option<TransactionSummary>,
}

impl ExtractedData {
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty() && self.transaction.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_distinguish_inputs_and_outputs() {
        let input = TxInput::sid("tx", "BNB", "BNB", 0);
        let output = TxOutput::sid("tx", "BNB", "BNB", 0);
        assert_ne!(input, output);
        assert_eq!(input, TxInput::sid("tx", "BNB", "BNB", 0));
        assert_ne!(Coin::contract_id("BNB", "BNB"), Coin::contract_id("BNB", "USDT-6D8"));
    }
}
