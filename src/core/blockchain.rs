//! The block store: a sled-backed map from block hash to serialized block,
//! plus a reserved key for the chain tip. Appending a block and advancing
//! the tip happen in one storage transaction, so the store never exposes a
//! half-committed chain head.

use crate::core::proof_of_work::TARGET_BITS;
use crate::core::{Block, Transaction, UnspentOutput};
use crate::error::{LedgerError, Result};
use data_encoding::HEXLOWER;
use log::info;
use sled::{Db, Tree};
use std::collections::{HashMap, HashSet};
use std::env::current_dir;
use std::sync::{Arc, RwLock};

const TIP_BLOCK_HASH_KEY: &str = "tip_block_hash";
const BLOCKS_TREE: &str = "blocks";

#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<String>>,
    db: Db,
    target_bits: u32,
}

impl Blockchain {
    /// Create a new chain in this node's database, mining the genesis block
    /// with a single coinbase paying `genesis_address`. Databases are
    /// per-node so several nodes can share a machine.
    pub fn create_blockchain_with_node_id(
        genesis_address: &str,
        node_id: &str,
    ) -> Result<Blockchain> {
        Self::create_blockchain_with_path(genesis_address, &Self::node_db_path(node_id)?)
    }

    /// Open this node's chain. Fails if none exists.
    pub fn new_blockchain_with_node_id(node_id: &str) -> Result<Blockchain> {
        Self::new_blockchain_with_path(&Self::node_db_path(node_id)?)
    }

    fn node_db_path(node_id: &str) -> Result<String> {
        Ok(current_dir()?
            .join("data")
            .join(format!("node_{node_id}"))
            .to_string_lossy()
            .to_string())
    }

    pub fn create_blockchain_with_path(genesis_address: &str, db_path: &str) -> Result<Blockchain> {
        Self::create_blockchain_with_path_and_bits(genesis_address, db_path, TARGET_BITS)
    }

    /// Difficulty is fixed per chain; tests pass fewer bits to keep mining
    /// fast.
    pub fn create_blockchain_with_path_and_bits(
        genesis_address: &str,
        db_path: &str,
        target_bits: u32,
    ) -> Result<Blockchain> {
        let db = sled::open(db_path)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        let tip_hash = match blocks_tree.get(TIP_BLOCK_HASH_KEY)? {
            Some(data) => String::from_utf8(data.to_vec())
                .map_err(|e| LedgerError::Storage(format!("corrupt tip pointer: {e}")))?,
            None => {
                info!("creating genesis block for {genesis_address}");
                let coinbase_tx = Transaction::new_coinbase_tx(genesis_address)?;
                let genesis = Block::generate_genesis_block(&coinbase_tx, target_bits)?;
                Self::update_blocks_tree(&blocks_tree, &genesis)?;
                genesis.get_hash().to_string()
            }
        };

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            target_bits,
        })
    }

    pub fn new_blockchain_with_path(db_path: &str) -> Result<Blockchain> {
        let db = sled::open(db_path)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        let tip_bytes = blocks_tree.get(TIP_BLOCK_HASH_KEY)?.ok_or_else(|| {
            LedgerError::Storage("no existing chain found; create one first".to_string())
        })?;
        let tip_hash = String::from_utf8(tip_bytes.to_vec())
            .map_err(|e| LedgerError::Storage(format!("corrupt tip pointer: {e}")))?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            target_bits: TARGET_BITS,
        })
    }

    /// Unconditional write of a freshly mined block plus tip advance, in one
    /// storage transaction.
    fn update_blocks_tree(blocks_tree: &Tree, block: &Block) -> Result<()> {
        let block_hash = block.get_hash();
        let block_data = block.serialize()?;

        blocks_tree
            .transaction(|tx_db| {
                tx_db.insert(block_hash, block_data.as_slice())?;
                tx_db.insert(TIP_BLOCK_HASH_KEY, block_hash)?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError| {
                LedgerError::Storage(format!("failed to commit block: {e}"))
            })?;
        Ok(())
    }

    pub fn get_db(&self) -> &Db {
        &self.db
    }

    pub fn get_target_bits(&self) -> u32 {
        self.target_bits
    }

    pub fn get_tip_hash(&self) -> String {
        self.tip_hash
            .read()
            .expect("tip hash lock poisoned")
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &str) {
        let mut tip_hash = self.tip_hash.write().expect("tip hash lock poisoned");
        *tip_hash = String::from(new_tip_hash);
    }

    /// Validate and mine a block over the given transactions, then commit it
    /// as the new tip. Every transaction must verify against the chain, and
    /// no output may be spent twice within the block.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        for transaction in transactions {
            if !self.verify_transaction(transaction)? {
                return Err(LedgerError::Validation(format!(
                    "transaction {} failed verification",
                    transaction.id_hex()
                )));
            }
        }
        self.check_block_double_spends(transactions)?;

        let best_height = self.get_best_height()?;
        let block = Block::new(
            self.get_tip_hash(),
            transactions,
            best_height + 1,
            self.target_bits,
        )?;

        let blocks_tree = self.db.open_tree(BLOCKS_TREE)?;
        Self::update_blocks_tree(&blocks_tree, &block)?;
        self.set_tip_hash(block.get_hash());

        info!(
            "mined block {} at height {}",
            block.get_hash(),
            block.get_height()
        );
        Ok(block)
    }

    /// Two transactions in one block must not consume the same output.
    fn check_block_double_spends(&self, transactions: &[Transaction]) -> Result<()> {
        let mut spent: HashSet<(Vec<u8>, i64)> = HashSet::new();
        for transaction in transactions {
            if transaction.is_coinbase() {
                continue;
            }
            for input in transaction.get_vin() {
                let reference = (input.get_txid().to_vec(), input.get_vout());
                if !spent.insert(reference) {
                    return Err(LedgerError::Validation(format!(
                        "output {}:{} spent twice within one block",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Append a block received from a peer. A no-op if the block is already
    /// stored. The tip pointer moves only when the new block is strictly
    /// higher than the current tip; on equal heights the existing tip wins.
    pub fn add_block(&self, block: &Block) -> Result<()> {
        let blocks_tree = self.db.open_tree(BLOCKS_TREE)?;
        if blocks_tree.get(block.get_hash())?.is_some() {
            return Ok(());
        }

        let block_data = block.serialize()?;
        let tip_moved = blocks_tree
            .transaction(|tx_db| {
                tx_db.insert(block.get_hash(), block_data.as_slice())?;

                let tip_bytes = tx_db.get(TIP_BLOCK_HASH_KEY)?.ok_or_else(|| {
                    sled::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "chain tip pointer missing",
                    ))
                })?;
                let tip_block_bytes = tx_db.get(tip_bytes)?.ok_or_else(|| {
                    sled::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "tip block missing",
                    ))
                })?;
                let tip_block = Block::deserialize(tip_block_bytes.as_ref()).map_err(|_| {
                    sled::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "corrupt tip block",
                    ))
                })?;

                if block.get_height() > tip_block.get_height() {
                    tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            })
            .map_err(|e: sled::transaction::TransactionError| {
                LedgerError::Storage(format!("failed to append block: {e}"))
            })?;

        if tip_moved {
            self.set_tip_hash(block.get_hash());
        }
        Ok(())
    }

    pub fn get_best_height(&self) -> Result<usize> {
        let tip_block = self
            .get_block(&self.get_tip_hash())?
            .ok_or_else(|| LedgerError::Storage("tip block missing".to_string()))?;
        Ok(tip_block.get_height())
    }

    pub fn get_block(&self, block_hash: &str) -> Result<Option<Block>> {
        self.get_block_by_bytes(block_hash.as_bytes())
    }

    pub fn get_block_by_bytes(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        let blocks_tree = self.db.open_tree(BLOCKS_TREE)?;
        match blocks_tree.get(block_hash)? {
            Some(bytes) => Ok(Some(Block::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    pub fn block_exists(&self, block_hash: &str) -> Result<bool> {
        let blocks_tree = self.db.open_tree(BLOCKS_TREE)?;
        Ok(blocks_tree.get(block_hash)?.is_some())
    }

    /// Block hashes of the current main chain, tip first.
    pub fn get_block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        let mut hashes = vec![];
        let mut iterator = self.iterator();
        while let Some(block) = iterator.next_block()? {
            hashes.push(block.get_hash_bytes());
        }
        Ok(hashes)
    }

    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.db.clone())
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        let mut iterator = self.iterator();
        while let Some(block) = iterator.next_block()? {
            for transaction in block.get_transactions() {
                if txid == transaction.get_id() {
                    return Ok(Some(transaction.clone()));
                }
            }
        }
        Ok(None)
    }

    /// Every unspent output on the main chain, keyed by hex transaction id
    /// and carrying the output's index within its transaction. Used for full
    /// UTXO index rebuilds.
    pub fn find_utxo(&self) -> Result<HashMap<String, Vec<UnspentOutput>>> {
        let mut utxo: HashMap<String, Vec<UnspentOutput>> = HashMap::new();
        let mut spent: HashMap<String, Vec<i64>> = HashMap::new();

        let mut iterator = self.iterator();
        while let Some(block) = iterator.next_block()? {
            for tx in block.get_transactions() {
                let txid_hex = tx.id_hex();
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    let is_spent = spent
                        .get(&txid_hex)
                        .is_some_and(|outs| outs.contains(&(idx as i64)));
                    if !is_spent {
                        utxo.entry(txid_hex.clone())
                            .or_default()
                            .push(UnspentOutput::new(idx, out.clone()));
                    }
                }
                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    spent
                        .entry(HEXLOWER.encode(txin.get_txid()))
                        .or_default()
                        .push(txin.get_vout());
                }
            }
        }
        Ok(utxo)
    }

    /// Resolve the prior transaction of every input, as the map form the
    /// transaction signing and verification routines require.
    fn resolve_prev_transactions(
        &self,
        transaction: &Transaction,
    ) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for vin in transaction.get_vin() {
            let txid_hex = HEXLOWER.encode(vin.get_txid());
            let prev_tx = self.find_transaction(vin.get_txid())?.ok_or_else(|| {
                LedgerError::Validation(format!("referenced transaction {txid_hex} not found"))
            })?;
            prev_txs.insert(txid_hex, prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, transaction: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = self.resolve_prev_transactions(transaction)?;
        transaction.sign(&prev_txs, pkcs8)
    }

    pub fn verify_transaction(&self, transaction: &Transaction) -> Result<bool> {
        if transaction.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.resolve_prev_transactions(transaction)?;
        transaction.verify(&prev_txs)
    }
}

/// Lazy walk from the tip back to genesis. The sequence is finite and not
/// restartable: after the block with an empty predecessor hash is yielded,
/// every further call returns `None`.
pub struct BlockchainIterator {
    db: Db,
    current_hash: String,
}

impl BlockchainIterator {
    fn new(tip_hash: String, db: Db) -> BlockchainIterator {
        BlockchainIterator {
            current_hash: tip_hash,
            db,
        }
    }

    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if self.current_hash.is_empty() {
            return Ok(None);
        }
        let blocks_tree = self.db.open_tree(BLOCKS_TREE)?;
        let data = blocks_tree
            .get(&self.current_hash)?
            .ok_or_else(|| {
                LedgerError::Storage(format!("block {} missing from store", self.current_hash))
            })?;
        let block = Block::deserialize(data.as_ref())?;
        self.current_hash = block.get_pre_block_hash().to_string();
        Ok(Some(block))
    }
}
