//! In-memory node state shared across connection workers: the mempool of
//! not-yet-mined transactions and the queue of block hashes still to be
//! fetched from a peer. Both guard their contents behind an internal lock;
//! workers never touch the raw containers.

use crate::core::Transaction;
use data_encoding::HEXLOWER;
use log::error;
use std::collections::HashMap;
use std::sync::RwLock;

/// Pending transactions keyed by hex transaction id.
pub struct MemoryPool {
    inner: RwLock<HashMap<String, Transaction>>,
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPool {
    pub fn new() -> MemoryPool {
        MemoryPool {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, tx: Transaction) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.insert(HEXLOWER.encode(tx.get_id()), tx);
            }
            Err(_) => error!("memory pool lock poisoned on add"),
        }
    }

    pub fn get(&self, txid_hex: &str) -> Option<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.get(txid_hex).cloned(),
            Err(_) => {
                error!("memory pool lock poisoned on get");
                None
            }
        }
    }

    pub fn contains(&self, txid_hex: &str) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.contains_key(txid_hex),
            Err(_) => {
                error!("memory pool lock poisoned on contains");
                false
            }
        }
    }

    pub fn remove(&self, txid_hex: &str) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.remove(txid_hex);
            }
            Err(_) => error!("memory pool lock poisoned on remove"),
        }
    }

    pub fn get_all(&self) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.values().cloned().collect(),
            Err(_) => {
                error!("memory pool lock poisoned on get_all");
                Vec::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hashes of blocks announced by a peer and not yet downloaded, drained
/// front to back during synchronization.
pub struct BlockInTransit {
    inner: RwLock<Vec<Vec<u8>>>,
}

impl Default for BlockInTransit {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockInTransit {
    pub fn new() -> BlockInTransit {
        BlockInTransit {
            inner: RwLock::new(vec![]),
        }
    }

    /// Swap in a freshly announced inventory, dropping whatever was queued.
    pub fn replace(&self, blocks: &[Vec<u8>]) {
        match self.inner.write() {
            Ok(mut queue) => {
                queue.clear();
                queue.extend(blocks.iter().cloned());
            }
            Err(_) => error!("block transit lock poisoned on replace"),
        }
    }

    pub fn first(&self) -> Option<Vec<u8>> {
        match self.inner.read() {
            Ok(queue) => queue.first().cloned(),
            Err(_) => {
                error!("block transit lock poisoned on first");
                None
            }
        }
    }

    pub fn remove(&self, block_hash: &[u8]) {
        match self.inner.write() {
            Ok(mut queue) => {
                if let Some(idx) = queue.iter().position(|h| h == block_hash) {
                    queue.remove(idx);
                }
            }
            Err(_) => error!("block transit lock poisoned on remove"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.inner.read() {
            Ok(queue) => queue.is_empty(),
            Err(_) => true,
        }
    }
}
