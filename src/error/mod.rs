//! Error handling for the ledger.
//!
//! Errors fall into the categories the node reacts to differently: validation
//! and network failures are recovered locally (the offending transaction,
//! block, or peer is dropped), while storage failures are fatal because chain
//! integrity can no longer be guaranteed.

use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Backing store unavailable or corrupt. Fatal: callers at the process
    /// boundary must abort rather than continue with undefined chain state.
    #[error("storage error: {0}")]
    Storage(String),
    /// Bad signature, malformed reference, or unbalanced transaction
    #[error("validation error: {0}")]
    Validation(String),
    /// A received block failed the proof-of-work check
    #[error("consensus violation: {0}")]
    Consensus(String),
    /// Peer unreachable or malformed message; recovered locally
    #[error("network error: {0}")]
    Network(String),
    /// Encoding or decoding of a persisted/wire structure failed
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Key generation, signing, or digest failure
    #[error("crypto error: {0}")]
    Crypto(String),
    /// Keystore lookup or persistence failure
    #[error("wallet error: {0}")]
    Wallet(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },
    /// Nonce space exhausted or miner misconfigured
    #[error("mining error: {0}")]
    Mining(String),
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err.to_string())
    }
}

impl From<sled::Error> for LedgerError {
    fn from(err: sled::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for LedgerError {
    fn from(err: bincode::error::EncodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for LedgerError {
    fn from(err: bincode::error::DecodeError) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}
