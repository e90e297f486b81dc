//! Persistence and node-local state: the derived UTXO index over sled and
//! the in-memory mempool/transit queues used by the peer server.

pub mod memory_pool;
pub mod utxo_set;

pub use memory_pool::{BlockInTransit, MemoryPool};
pub use utxo_set::UTXOSet;
