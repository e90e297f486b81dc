use crate::core::Transaction;
use crate::error::{LedgerError, Result};
use crate::utils::sha256_digest;

/// Binary hash tree over the ordered, serialized transaction set of a block.
///
/// Leaves are SHA-256 digests of whole serialized transactions; internal
/// nodes hash the concatenation of their children. A level with an odd
/// number of nodes pairs its last node with a duplicate of itself, so a
/// single-transaction block still hashes one level up. The root is always
/// recomputed from the transactions and never persisted on its own.
pub struct MerkleTree {
    root: Vec<u8>,
}

impl MerkleTree {
    pub fn new(transactions: &[Transaction]) -> Result<MerkleTree> {
        if transactions.is_empty() {
            return Err(LedgerError::Validation(
                "cannot build a Merkle tree over zero transactions".to_string(),
            ));
        }

        let mut leaves = Vec::with_capacity(transactions.len());
        for tx in transactions {
            leaves.push(sha256_digest(&tx.serialize()?));
        }

        Ok(MerkleTree {
            root: Self::build_root(leaves),
        })
    }

    /// Convenience for callers that only need the digest.
    pub fn root_of(transactions: &[Transaction]) -> Result<Vec<u8>> {
        Ok(Self::new(transactions)?.root)
    }

    pub fn root_hash(&self) -> &[u8] {
        &self.root
    }

    fn build_root(mut level: Vec<Vec<u8>>) -> Vec<u8> {
        if level.len() == 1 {
            return Self::hash_pair(&level[0], &level[0]);
        }

        while level.len() > 1 {
            if level.len() % 2 != 0 {
                // duplicate the trailing node so every parent has two children
                let last = level[level.len() - 1].clone();
                level.push(last);
            }
            level = level
                .chunks(2)
                .map(|pair| Self::hash_pair(&pair[0], &pair[1]))
                .collect();
        }
        level.remove(0)
    }

    fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(left.len() + right.len());
        data.extend_from_slice(left);
        data.extend_from_slice(right);
        sha256_digest(&data)
    }
}
