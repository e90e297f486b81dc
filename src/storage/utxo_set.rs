//! Derived index of unspent outputs, persisted in its own sled tree and
//! maintained separately from the block store. Entries are keyed by raw
//! transaction id and hold the transaction's outputs that no committed
//! transaction has consumed, each with its original output index.

use crate::core::{Block, Blockchain, TXOutput, UnspentOutput};
use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::info;
use sled::IVec;
use std::collections::HashMap;

const UTXO_TREE: &str = "chainstate";

pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    fn utxo_tree(&self) -> Result<sled::Tree> {
        Ok(self.blockchain.get_db().open_tree(UTXO_TREE)?)
    }

    /// Scan entries in ascending transaction-id order, accumulating outputs
    /// locked to `pub_key_hash` until `amount` is covered. Stops as soon as
    /// the threshold is reached; may return less than `amount`, in which
    /// case the caller must not proceed with the spend.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<usize>>)> {
        let mut selected: HashMap<String, Vec<usize>> = HashMap::new();
        let mut accumulated: u64 = 0;
        let utxo_tree = self.utxo_tree()?;

        'scan: for item in utxo_tree.iter() {
            let (k, v) = item?;
            let txid_hex = HEXLOWER.encode(&k);
            let outs: Vec<UnspentOutput> = deserialize(&v)?;
            for entry in &outs {
                if entry.get_output().is_locked_with_key(pub_key_hash) {
                    accumulated += entry.get_output().get_value();
                    selected
                        .entry(txid_hex.clone())
                        .or_default()
                        .push(entry.get_index());
                    if accumulated >= amount {
                        break 'scan;
                    }
                }
            }
        }
        Ok((accumulated, selected))
    }

    /// All unspent outputs locked to `pub_key_hash`; summing their values
    /// gives the balance.
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxos = vec![];
        let utxo_tree = self.utxo_tree()?;
        for item in utxo_tree.iter() {
            let (_, v) = item?;
            let outs: Vec<UnspentOutput> = deserialize(&v)?;
            for entry in outs {
                if entry.get_output().is_locked_with_key(pub_key_hash) {
                    utxos.push(entry.get_output().clone());
                }
            }
        }
        Ok(utxos)
    }

    /// Number of distinct transaction ids tracked. Diagnostic only.
    pub fn count_transactions(&self) -> Result<u64> {
        let utxo_tree = self.utxo_tree()?;
        let mut counter = 0;
        for item in utxo_tree.iter() {
            item?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Rebuild the index from scratch by replaying the whole chain, then
    /// swap the new contents in within a single storage transaction so
    /// readers never observe a half-built index.
    pub fn reindex(&self) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;
        let utxo_map = self.blockchain.find_utxo()?;

        let mut stale_keys: Vec<IVec> = vec![];
        for item in utxo_tree.iter() {
            let (k, _) = item?;
            stale_keys.push(k);
        }

        let mut fresh: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(utxo_map.len());
        for (txid_hex, outs) in &utxo_map {
            let txid = HEXLOWER
                .decode(txid_hex.as_bytes())
                .map_err(|e| LedgerError::Storage(format!("corrupt transaction id: {e}")))?;
            fresh.push((txid, serialize(outs)?));
        }

        utxo_tree
            .transaction(|tx_db| {
                for key in &stale_keys {
                    tx_db.remove(key.as_ref())?;
                }
                for (k, v) in &fresh {
                    tx_db.insert(k.as_slice(), v.as_slice())?;
                }
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                LedgerError::Storage(format!("failed to rebuild UTXO index: {e}"))
            })?;

        info!("rebuilt UTXO index: {} transactions tracked", fresh.len());
        Ok(())
    }

    /// Incremental maintenance, invoked once per newly committed block:
    /// outputs consumed by the block's inputs leave the index (a drained
    /// entry is deleted), and every output of every transaction in the
    /// block enters it. All mutations for the block commit in one storage
    /// transaction, so a crash never leaves the index half-applied.
    pub fn update(&self, block: &Block) -> Result<()> {
        let utxo_tree = self.utxo_tree()?;

        let mut spends: Vec<(Vec<u8>, i64)> = vec![];
        let mut fresh: Vec<(Vec<u8>, Vec<u8>)> = vec![];
        for tx in block.get_transactions() {
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    spends.push((vin.get_txid().to_vec(), vin.get_vout()));
                }
            }
            let entries: Vec<UnspentOutput> = tx
                .get_vout()
                .iter()
                .enumerate()
                .map(|(idx, out)| UnspentOutput::new(idx, out.clone()))
                .collect();
            fresh.push((tx.get_id().to_vec(), serialize(&entries)?));
        }

        utxo_tree
            .transaction(|tx_db| {
                for (txid, vout) in &spends {
                    let outs_bytes = tx_db.get(txid.as_slice())?.ok_or_else(|| {
                        sled::Error::Io(std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "index entry for spent transaction missing",
                        ))
                    })?;
                    let outs: Vec<UnspentOutput> = deserialize(&outs_bytes).map_err(|_| {
                        sled::Error::Io(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "corrupt index entry",
                        ))
                    })?;
                    let remaining: Vec<UnspentOutput> = outs
                        .into_iter()
                        .filter(|entry| entry.get_index() as i64 != *vout)
                        .collect();

                    if remaining.is_empty() {
                        tx_db.remove(txid.as_slice())?;
                    } else {
                        let remaining_bytes = serialize(&remaining).map_err(|_| {
                            sled::Error::Io(std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                "index entry serialization failed",
                            ))
                        })?;
                        tx_db.insert(txid.as_slice(), remaining_bytes)?;
                    }
                }
                for (txid, entries_bytes) in &fresh {
                    tx_db.insert(txid.as_slice(), entries_bytes.as_slice())?;
                }
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                LedgerError::Storage(format!("failed to apply block to UTXO index: {e}"))
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::wallet::{hash_pub_key, Wallet};
    use tempfile::TempDir;

    const TEST_BITS: u32 = 8;

    fn test_chain(genesis_address: &str) -> (TempDir, Blockchain) {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir
            .path()
            .join("chain")
            .to_str()
            .expect("temp path is not utf-8")
            .to_string();
        let blockchain = Blockchain::create_blockchain_with_path_and_bits(
            genesis_address,
            &db_path,
            TEST_BITS,
        )
        .expect("failed to create blockchain");
        (temp_dir, blockchain)
    }

    #[test]
    fn test_update_preserves_original_output_indices() {
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let (_tmp, blockchain) = test_chain(&alice.get_address());
        let utxo_set = UTXOSet::new(blockchain.clone());
        utxo_set.reindex().unwrap();

        let tx =
            Transaction::new_utxo_transaction(&alice, &bob.get_address(), 4, &utxo_set).unwrap();
        let transfer_id_hex = tx.id_hex();
        let block = blockchain.mine_block(&[tx]).unwrap();
        utxo_set.update(&block).unwrap();

        // the drained genesis coinbase entry is gone, only the transfer
        // remains
        assert_eq!(utxo_set.count_transactions().unwrap(), 1);

        // the payment sits at output 0, the change at output 1, both still
        // addressable by their in-transaction indices
        let bob_hash = hash_pub_key(bob.get_public_key());
        let (accumulated, selected) = utxo_set.find_spendable_outputs(&bob_hash, 4).unwrap();
        assert_eq!(accumulated, 4);
        assert_eq!(selected.get(&transfer_id_hex), Some(&vec![0]));

        let alice_hash = hash_pub_key(alice.get_public_key());
        let (accumulated, selected) = utxo_set.find_spendable_outputs(&alice_hash, 6).unwrap();
        assert_eq!(accumulated, 6);
        assert_eq!(selected.get(&transfer_id_hex), Some(&vec![1]));
    }

    #[test]
    fn test_update_with_missing_spent_entry_changes_nothing() {
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let (_tmp, blockchain) = test_chain(&alice.get_address());
        let utxo_set = UTXOSet::new(blockchain.clone());
        utxo_set.reindex().unwrap();

        let tx =
            Transaction::new_utxo_transaction(&alice, &bob.get_address(), 4, &utxo_set).unwrap();
        let block = blockchain.mine_block(&[tx]).unwrap();
        utxo_set.update(&block).unwrap();
        let tracked = utxo_set.count_transactions().unwrap();

        // Replaying the block spends an entry the index no longer holds. The
        // whole update aborts: a storage error and no partial mutation.
        let replay = utxo_set.update(&block);
        assert!(matches!(replay, Err(LedgerError::Storage(_))));
        assert_eq!(utxo_set.count_transactions().unwrap(), tracked);
    }
}
