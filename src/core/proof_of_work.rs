use crate::core::Block;
use crate::error::{LedgerError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::info;
use num_bigint::{BigInt, Sign};

/// Default difficulty: a block hash must be below `2^(256 - TARGET_BITS)`
/// when read as a big-endian 256-bit integer.
pub const TARGET_BITS: u32 = 24;

const MAX_NONCE: i64 = i64::MAX;

/// Stateless nonce search and validation over a block header.
///
/// The header is `prev_hash || merkle_root || be(timestamp) || be(bits) ||
/// be(nonce)`; the Merkle root is recomputed from the transaction set on
/// every call, so any transaction mutation invalidates the stored hash.
pub struct ProofOfWork {
    block: Block,
    target: BigInt,
    bits: u32,
}

impl ProofOfWork {
    pub fn new(block: Block) -> ProofOfWork {
        Self::with_bits(block, TARGET_BITS)
    }

    /// Difficulty is a chain-wide parameter; tests use fewer bits to keep
    /// the search fast.
    pub fn with_bits(block: Block, bits: u32) -> ProofOfWork {
        let mut target = BigInt::from(1);
        target <<= 256 - bits;
        ProofOfWork { block, target, bits }
    }

    fn prepare_data(&self, nonce: i64) -> Result<Vec<u8>> {
        let merkle_root = self.block.hash_transactions()?;
        let mut data = Vec::new();
        data.extend(self.block.get_pre_block_hash().as_bytes());
        data.extend(merkle_root);
        data.extend(self.block.get_timestamp().to_be_bytes());
        data.extend(self.bits.to_be_bytes());
        data.extend(nonce.to_be_bytes());
        Ok(data)
    }

    /// Search the nonce space from zero until the header digest drops below
    /// the target. Exhausting the space is a mining failure; at 24 bits it
    /// is not expected to happen.
    pub fn run(&self) -> Result<(i64, String)> {
        info!(
            "mining block at height {} ({} bits)",
            self.block.get_height(),
            self.bits
        );
        let mut nonce = 0;
        while nonce < MAX_NONCE {
            let data = self.prepare_data(nonce)?;
            let hash = sha256_digest(&data);
            let hash_int = BigInt::from_bytes_be(Sign::Plus, &hash);
            if hash_int < self.target {
                let hash_hex = HEXLOWER.encode(&hash);
                info!("found block hash {hash_hex} at nonce {nonce}");
                return Ok((nonce, hash_hex));
            }
            nonce += 1;
        }
        Err(LedgerError::Mining("nonce space exhausted".to_string()))
    }

    /// Recompute the header digest for the block's stored nonce and check it
    /// against both the target and the stored hash. Runs after local mining
    /// and on every block received from a peer.
    pub fn validate(block: &Block, bits: u32) -> Result<bool> {
        let pow = ProofOfWork::with_bits(block.clone(), bits);
        let data = pow.prepare_data(block.get_nonce())?;
        let hash = sha256_digest(&data);
        let hash_int = BigInt::from_bytes_be(Sign::Plus, &hash);
        Ok(hash_int < pow.target && HEXLOWER.encode(&hash) == block.get_hash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::wallet::Wallet;

    const TEST_BITS: u32 = 8;

    fn mined_block() -> Block {
        let address = Wallet::new().unwrap().get_address();
        let coinbase = Transaction::new_coinbase_tx(&address).unwrap();
        Block::new(String::new(), &[coinbase], 0, TEST_BITS).unwrap()
    }

    #[test]
    fn test_mined_block_validates() {
        let block = mined_block();
        assert!(ProofOfWork::validate(&block, TEST_BITS).unwrap());
    }

    #[test]
    fn test_validation_fails_at_higher_difficulty() {
        // A block mined at 8 bits will essentially never satisfy 64 bits,
        // and its stored hash no longer matches the recomputed header.
        let block = mined_block();
        assert!(!ProofOfWork::validate(&block, 64).unwrap());
    }

    #[test]
    fn test_prepare_data_varies_with_nonce() {
        let block = mined_block();
        let pow = ProofOfWork::with_bits(block, TEST_BITS);
        let a = pow.prepare_data(1).unwrap();
        let b = pow.prepare_data(1).unwrap();
        let c = pow.prepare_data(2).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
