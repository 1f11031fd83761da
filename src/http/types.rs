use serde::{Deserialize, Serialize};

use crate::models::{Block, BlockHeader, Transaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipResponse {
    pub height: u64,
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResponse {
    pub hash: String,
    pub previous_hash: String,
    pub height: u64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub transactions: Vec<String>,
}

impl From<BlockResponse> for Block {
    fn from(value: BlockResponse) -> Self {
        Block {
            header: BlockHeader {
                hash: value.hash,
                previous_hash: value.previous_hash,
                height: value.height,
                timestamp: value.timestamp,
            },
            transactions: value.transactions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinAmount {
    pub denom: String,
    pub amount: u64,
}

/// One side of a transfer message: an address and the coins it sends or receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferParty {
    pub address: String,
    #[serde(default)]
    pub coins: Vec<CoinAmount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub txid: String,
    #[serde(default)]
    pub block_height: u64,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub inputs: Vec<TransferParty>,
    #[serde(default)]
    pub outputs: Vec<TransferParty>,
}

impl From<TransactionResponse> for Transaction {
    fn from(value: TransactionResponse) -> Self {
        let mut tx = Transaction::new(value.txid, value.block_height);
        tx.memo = value.memo;
        for input in value.inputs {
            for coin in input.coins {
                tx.add_input(&coin.denom, input.address.clone(), coin.amount);
            }
        }
        for output in value.outputs {
            for coin in output.coins {
                tx.add_output(&coin.denom, output.address.clone(), coin.amount);
            }
        }
        tx
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolResponse {
    #[serde(default)]
    pub txids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeResponse {
    pub height: u64,
    /// Fee for a transfer with one sender and one receiver.
    pub single: u64,
    /// Fee for a transfer with several parties or several assets.
    pub multi: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub denom: String,
    pub free: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub address: String,
    #[serde(default)]
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressTransactionsResponse {
    #[serde(default)]
    pub txs: Vec<TransactionResponse>,
}
