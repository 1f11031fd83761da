//! Turns a decoded transaction into owner-attributed records.
//!
//! For every denomination group of a transaction:
//!
//! - the first owned sender makes the group's `denom:<owner>` bucket the sender bucket: every
//!   sender of the group becomes an input record and the bucket gets the canonical summary
//! - the first owned receiver makes a `denom:<owner>` receiver bucket with one output record
//!   per receiver; a summary is synthesized if the bucket has none yet
//!
//! The fee is attributed once per transaction, to the first owned sender found, in a
//! `fee:<owner>` bucket denominated in the chain's native asset.
//!
//! Classification is pure: fees are looked up by the caller (see [`TransactionClassifier::fee_payer`])
//! and passed in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{
    Coin, ExtractedData, OwnerKey, Transaction, TransactionSummary, TransferGroup, TxInput, TxOutput, TxStatus, TxType,
};
use crate::scan::resolver::AddressResolver;

/// The chain's native asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAsset {
    pub symbol: String,
    pub name: String,
    pub native_denom: String,
    pub decimals: u32,
}

impl Default for ChainAsset {
    fn default() -> Self {
        Self {
            symbol: "BNB".to_string(),
            name: "Binance Chain".to_string(),
            native_denom: "BNB".to_string(),
            decimals: 8,
        }
    }
}

/// Which fee schedule applies to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeKind {
    /// One denomination, one sender, one receiver.
    Single,
    /// Several denominations, or several senders or receivers.
    Multi,
}

/// The owned sender the fee is charged to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeePayer {
    /// Index of the group in which the owned sender was found.
    pub group: usize,
    pub source_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionClassifier {
    asset: ChainAsset,
}

impl TransactionClassifier {
    pub fn new(asset: ChainAsset) -> Self {
        Self { asset }
    }

    pub fn asset(&self) -> &ChainAsset {
        &self.asset
    }

    pub fn fee_kind(tx: &Transaction) -> FeeKind {
        match tx.groups.as_slice() {
            [group] if !group.is_multi_party() => FeeKind::Single,
            _ => FeeKind::Multi,
        }
    }

    /// The first group with an owned sender, if any. Only such transactions carry a fee record.
    pub fn fee_payer(&self, tx: &Transaction, resolver: &dyn AddressResolver) -> Option<FeePayer> {
        tx.groups.iter().enumerate().find_map(|(index, group)| {
            owned_address(&group.from, resolver).map(|source_key| FeePayer {
                group: index,
                source_key,
            })
        })
    }

    pub fn coin(&self, denom: &str) -> Coin {
        let decimals = if denom == self.asset.native_denom {
            self.asset.decimals
        } else {
            0
        };
        Coin::new(&self.asset.symbol, denom, &self.asset.name, decimals)
    }

    /// Classifies `tx`. A fee record is only produced when `fee` is given and an owned sender exists.
    ///
    /// A transaction touching no owned address yields an empty map.
    pub fn classify(
        &self,
        tx: &Transaction,
        block_hash: &str,
        resolver: &dyn AddressResolver,
        fee: Option<u64>,
    ) -> BTreeMap<OwnerKey, ExtractedData> {
        let mut extracted: BTreeMap<OwnerKey, ExtractedData> = BTreeMap::new();
        let mut fee_attributed = false;

        for group in &tx.groups {
            let coin = self.coin(&group.denom);
            let from_pairs: Vec<String> = group.from.iter().map(|f| f.pair()).collect();
            let to_pairs: Vec<String> = group.to.iter().map(|t| t.pair()).collect();

            if let Some(source_key) = owned_address(&group.from, resolver) {
                let data = extracted
                    .entry(OwnerKey::asset(&group.denom, &source_key))
                    .or_default();
                data.inputs.extend(self.inputs(tx, group, &coin, block_hash));
                data.transaction = Some(self.summary(tx, &coin, block_hash, from_pairs.clone(), to_pairs.clone()));

                if !fee_attributed {
                    fee_attributed = true;
                    if let Some(fee) = fee {
                        let fee_data = extracted.entry(OwnerKey::fee(&source_key)).or_default();
                        self.charge_fee(fee_data, tx, group, block_hash, fee);
                    }
                }
            }

            if let Some(source_key) = owned_address(&group.to, resolver) {
                let data = extracted
                    .entry(OwnerKey::asset(&group.denom, &source_key))
                    .or_default();
                data.outputs.extend(self.outputs(tx, group, &coin, block_hash));
                if data.transaction.is_none() {
                    data.transaction = Some(self.summary(tx, &coin, block_hash, from_pairs, to_pairs));
                }
            }
        }

        extracted
    }

    fn inputs(&self, tx: &Transaction, group: &TransferGroup, coin: &Coin, block_hash: &str) -> Vec<TxInput> {
        group
            .from
            .iter()
            .enumerate()
            .map(|(index, from)| TxInput {
                sid: TxInput::sid(&tx.txid, &coin.symbol, &coin.denom, index as u64),
                txid: tx.txid.clone(),
                index: index as u64,
                address: from.address.clone(),
                amount: from.amount,
                coin: coin.clone(),
                block_height: tx.block_height,
                block_hash: block_hash.to_string(),
                memo: tx.memo.clone(),
                tx_type: TxType::Transfer,
            })
            .collect()
    }

    fn outputs(&self, tx: &Transaction, group: &TransferGroup, coin: &Coin, block_hash: &str) -> Vec<TxOutput> {
        group
            .to
            .iter()
            .enumerate()
            .map(|(index, to)| TxOutput {
                sid: TxOutput::sid(&tx.txid, &coin.symbol, &coin.denom, index as u64),
                txid: tx.txid.clone(),
                index: index as u64,
                address: to.address.clone(),
                amount: to.amount,
                coin: coin.clone(),
                block_height: tx.block_height,
                block_hash: block_hash.to_string(),
                memo: tx.memo.clone(),
            })
            .collect()
    }

    fn summary(
        &self,
        tx: &Transaction,
        coin: &Coin,
        block_hash: &str,
        from: Vec<String>,
        to: Vec<String>,
    ) -> TransactionSummary {
        TransactionSummary {
            wx_id: String::new(),
            txid: tx.txid.clone(),
            from,
            to,
            amount: None,
            fees: 0,
            coin: coin.clone(),
            block_height: tx.block_height,
            block_hash: block_hash.to_string(),
            status: TxStatus::Success,
            memo: tx.memo.clone(),
            tx_type: TxType::Transfer,
        }
        .with_wx_id()
    }

    fn charge_fee(&self, data: &mut ExtractedData, tx: &Transaction, group: &TransferGroup, block_hash: &str, fee: u64) {
        let Some(payer) = group.from.first() else {
            return;
        };
        let coin = self.coin(&self.asset.native_denom);

        data.inputs.push(TxInput {
            sid: TxInput::sid(&tx.txid, &coin.symbol, &coin.denom, 0),
            txid: tx.txid.clone(),
            index: 0,
            address: payer.address.clone(),
            amount: fee,
            coin: coin.clone(),
            block_height: tx.block_height,
            block_hash: block_hash.to_string(),
            memo: tx.memo.clone(),
            tx_type: TxType::FeeCharge,
        });

        data.transaction = Some(
            TransactionSummary {
                wx_id: String::new(),
                txid: tx.txid.clone(),
                from: vec![format!("{}:{}", payer.address, fee)],
                to: vec![String::new()],
                amount: Some(fee),
                fees: 0,
                coin,
                block_height: tx.block_height,
                block_hash: block_hash.to_string(),
                status: TxStatus::Success,
                memo: tx.memo.clone(),
                tx_type: TxType::FeeCharge,
            }
            .with_wx_id(),
        );
    }
}

fn owned_address(entries: &[crate::models::AddrAmount], resolver: &dyn AddressResolver) -> Option<String> {
    entries.iter().find_map(|entry| resolver.owner_of(&entry.address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OwnerBucket;
    use crate::scan::resolver::WatchList;

    fn watch(entries: &[(&str, &str)]) -> WatchList {
        let mut list = WatchList::new();
        for (address, key) in entries {
            list.watch(*address, *key);
        }
        list
    }

    fn transfer(txid: &str, denom: &str, from: &str, to: &str, amount: u64) -> Transaction {
        let mut tx = Transaction::new(txid, 100);
        tx.add_input(denom, from, amount);
        tx.add_output(denom, to, amount);
        tx
    }

    #[test]
    fn test_owned_sender_and_receiver_produce_three_buckets() {
        let classifier = TransactionClassifier::default();
        let resolver = watch(&[("alice", "acc-a"), ("bob", "acc-b")]);
        let tx = transfer("t1", "BNB", "alice", "bob", 500);

        let fee_kind = TransactionClassifier::fee_kind(&tx);
        assert_eq!(fee_kind, FeeKind::Single);

        let out = classifier.classify(&tx, "hash100", &resolver, Some(37_500));
        let keys: Vec<String> = out.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["BNB:acc-a", "BNB:acc-b", "fee:acc-a"]);

        let sender = &out[&OwnerKey::asset("BNB", "acc-a")];
        assert_eq!(sender.inputs.len(), 1);
        assert!(sender.outputs.is_empty());
        let summary = sender.transaction.as_ref().unwrap();
        assert_eq!(summary.from, vec!["alice:500"]);
        assert_eq!(summary.to, vec!["bob:500"]);
        assert_eq!(summary.block_hash, "hash100");
        assert_eq!(summary.wx_id.len(), 64);

        let receiver = &out[&OwnerKey::asset("BNB", "acc-b")];
        assert_eq!(receiver.outputs.len(), 1);
        assert_eq!(receiver.transaction.as_ref().unwrap().wx_id, summary.wx_id);

        let fee = &out[&OwnerKey::fee("acc-a")];
        assert_eq!(fee.inputs.len(), 1);
        assert_eq!(fee.inputs[0].amount, 37_500);
        assert_eq!(fee.inputs[0].tx_type, TxType::FeeCharge);
        let fee_summary = fee.transaction.as_ref().unwrap();
        assert_eq!(fee_summary.amount, Some(37_500));
        assert_eq!(fee_summary.tx_type, TxType::FeeCharge);
        assert_eq!(fee_summary.from, vec!["alice:37500"]);
    }

    #[test]
    fn test_fee_is_attributed_once_across_groups() {
        let classifier = TransactionClassifier::default();
        let resolver = watch(&[("alice", "acc-a")]);
        let mut tx = Transaction::new("t2", 100);
        tx.add_input("BNB", "alice", 10);
        tx.add_input("USDT-6D8", "alice", 20);
        tx.add_output("BNB", "bob", 10);
        tx.add_output("USDT-6D8", "bob", 20);

        assert_eq!(TransactionClassifier::fee_kind(&tx), FeeKind::Multi);
        assert_eq!(
            classifier.fee_payer(&tx, &resolver),
            Some(FeePayer {
                group: 0,
                source_key: "acc-a".to_string()
            })
        );

        let out = classifier.classify(&tx, "", &resolver, Some(60_000));
        let fee_buckets = out.keys().filter(|k| k.bucket == OwnerBucket::Fee).count();
        assert_eq!(fee_buckets, 1);
        assert_eq!(out[&OwnerKey::fee("acc-a")].inputs.len(), 1);
        assert!(out.contains_key(&OwnerKey::asset("BNB", "acc-a")));
        assert!(out.contains_key(&OwnerKey::asset("USDT-6D8", "acc-a")));
    }

    #[test]
    fn test_later_receiver_is_found() {
        let classifier = TransactionClassifier::default();
        let resolver = watch(&[("carol", "acc-c")]);
        let mut tx = Transaction::new("t3", 100);
        tx.add_input("BNB", "alice", 30);
        tx.add_output("BNB", "bob", 10);
        tx.add_output("BNB", "carol", 20);

        assert_eq!(classifier.fee_payer(&tx, &resolver), None);
        let out = classifier.classify(&tx, "", &resolver, None);
        assert_eq!(out.len(), 1);
        let data = &out[&OwnerKey::asset("BNB", "acc-c")];
        assert_eq!(data.outputs.len(), 2);
        assert_eq!(data.outputs[1].address, "carol");
        assert_eq!(data.outputs[1].index, 1);
    }

    #[test]
    fn test_unrelated_transaction_is_empty() {
        let classifier = TransactionClassifier::default();
        let resolver = watch(&[("zed", "acc-z")]);
        let tx = transfer("t4", "BNB", "alice", "bob", 1);
        assert!(classifier.classify(&tx, "", &resolver, Some(1)).is_empty());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = TransactionClassifier::default();
        let resolver = watch(&[("alice", "acc-a"), ("bob", "acc-b")]);
        let tx = transfer("t5", "BNB", "alice", "bob", 9);
        assert_eq!(
            classifier.classify(&tx, "h", &resolver, Some(1)),
            classifier.classify(&tx, "h", &resolver, Some(1))
        );
    }
}
