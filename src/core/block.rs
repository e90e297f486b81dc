use crate::core::{MerkleTree, ProofOfWork, Transaction};
use crate::error::{LedgerError, Result};
use crate::utils::{current_timestamp, deserialize, serialize};
use serde::{Deserialize, Serialize};

/// One link of the chain. Hashes are stored as lowercase hex; the genesis
/// block carries an empty `pre_block_hash`. A block is immutable once
/// appended to the store.
#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    pre_block_hash: String,
    hash: String,
    transactions: Vec<Transaction>,
    nonce: i64,
    height: usize,
}

impl Block {
    /// Assemble and mine a block over the given transactions. The hash and
    /// nonce are fixed by the proof-of-work run before the block is returned.
    pub fn new(
        pre_block_hash: String,
        transactions: &[Transaction],
        height: usize,
        target_bits: u32,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(LedgerError::Validation(
                "a block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            timestamp: current_timestamp()?,
            pre_block_hash,
            hash: String::new(),
            transactions: transactions.to_vec(),
            nonce: 0,
            height,
        };

        let pow = ProofOfWork::with_bits(block.clone(), target_bits);
        let (nonce, hash) = pow.run()?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// The genesis block holds exactly the coinbase transaction and no
    /// predecessor.
    pub fn generate_genesis_block(coinbase: &Transaction, target_bits: u32) -> Result<Block> {
        Block::new(String::new(), &[coinbase.clone()], 0, target_bits)
    }

    /// Merkle root over the serialized transaction set, recomputed on demand.
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        MerkleTree::root_of(&self.transactions)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize(bytes)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn get_pre_block_hash(&self) -> &str {
        &self.pre_block_hash
    }

    pub fn get_hash(&self) -> &str {
        &self.hash
    }

    pub fn get_hash_bytes(&self) -> Vec<u8> {
        self.hash.as_bytes().to_vec()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_height(&self) -> usize {
        self.height
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    /// Forge a block with given fields and no proof-of-work run. Tests use
    /// this to exercise validation against tampered data.
    #[cfg(test)]
    pub(crate) fn new_unmined(
        timestamp: i64,
        pre_block_hash: String,
        hash: String,
        transactions: &[Transaction],
        nonce: i64,
        height: usize,
    ) -> Block {
        Block {
            timestamp,
            pre_block_hash,
            hash,
            transactions: transactions.to_vec(),
            nonce,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    const TEST_BITS: u32 = 8;

    fn coinbase() -> Transaction {
        let address = Wallet::new().unwrap().get_address();
        Transaction::new_coinbase_tx(&address).unwrap()
    }

    #[test]
    fn test_genesis_has_no_predecessor() {
        let genesis = Block::generate_genesis_block(&coinbase(), TEST_BITS).unwrap();
        assert!(genesis.get_pre_block_hash().is_empty());
        assert_eq!(genesis.get_height(), 0);
        assert_eq!(genesis.get_transactions().len(), 1);
        assert!(ProofOfWork::validate(&genesis, TEST_BITS).unwrap());
    }

    #[test]
    fn test_empty_transaction_set_is_rejected() {
        assert!(Block::new(String::new(), &[], 0, TEST_BITS).is_err());
    }

    #[test]
    fn test_forged_block_fails_validation() {
        let mined = Block::new(String::new(), &[coinbase()], 0, TEST_BITS).unwrap();

        // Swap in a different transaction set while keeping the mined hash
        // and nonce; the recomputed Merkle root no longer matches.
        let forged = Block::new_unmined(
            mined.get_timestamp(),
            mined.get_pre_block_hash().to_string(),
            mined.get_hash().to_string(),
            &[coinbase()],
            mined.get_nonce(),
            mined.get_height(),
        );
        assert!(!ProofOfWork::validate(&forged, TEST_BITS).unwrap());
    }

    #[test]
    fn test_serialization_round_trip() {
        let block = Block::new(String::from("prev"), &[coinbase()], 1, TEST_BITS).unwrap();
        let decoded = Block::deserialize(&block.serialize().unwrap()).unwrap();
        assert_eq!(decoded.get_hash(), block.get_hash());
        assert_eq!(decoded.get_height(), block.get_height());
        assert_eq!(decoded.get_nonce(), block.get_nonce());
        assert_eq!(decoded.get_transactions().len(), 1);
    }
}
