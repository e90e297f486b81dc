//! Core ledger machinery: blocks, the block store, transactions, the Merkle
//! digest, and proof-of-work consensus.

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator};
pub use merkle::MerkleTree;
pub use proof_of_work::{ProofOfWork, TARGET_BITS};
pub use transaction::{Transaction, TXInput, TXOutput, UnspentOutput, SUBSIDY};
