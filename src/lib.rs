//! A minimal proof-of-work ledger: UTXO transactions signed with ECDSA P-256,
//! blocks chained by SHA-256 hashes over a Merkle root, sled-backed storage
//! with a derived UTXO index, and a gossip peer server that syncs chains and
//! mines once enough transactions accumulate.
//!
//! Layout:
//! - `core/`: blocks, transactions, proof of work, Merkle digests, the chain
//! - `wallet/`: key pairs, Base58Check addresses, the keystore file
//! - `storage/`: the UTXO index and in-memory node state
//! - `network/`: wire codec, known peers, the peer server
//! - `config/`: environment-seeded node settings
//! - `utils/`: hashing, encoding, signing primitives
//! - `cli/`: command definitions

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, MerkleTree, ProofOfWork, TXInput, TXOutput, Transaction, UnspentOutput,
    SUBSIDY, TARGET_BITS,
};
pub use error::{LedgerError, Result};
pub use network::{send_transaction, Server, CENTRAL_NODE, TRANSACTION_THRESHOLD};
pub use storage::{BlockInTransit, MemoryPool, UTXOSet};
pub use wallet::{Wallet, Wallets};
