//! Gossip networking: wire codec, known-peer set, and the peer server.

pub mod message;
pub mod node;
pub mod server;

pub use message::{InvKind, Message, NODE_VERSION};
pub use node::KnownNodes;
pub use server::{send_transaction, NodeState, Server, CENTRAL_NODE, TRANSACTION_THRESHOLD};
