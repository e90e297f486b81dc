//! Wire protocol: every frame is a fixed 12-byte zero-padded ASCII command
//! followed by a bincode payload. Peers read the full stream, split off the
//! command, then decode the payload matching that command.

use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use serde::{Deserialize, Serialize};

pub const COMMAND_LEN: usize = 12;
pub const NODE_VERSION: usize = 1;

/// Inventory item kind carried by `inv` and `getdata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum InvKind {
    Block,
    Tx,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct VersionPayload {
    pub addr_from: String,
    pub version: usize,
    pub best_height: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct InvPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct BlockPayload {
    pub addr_from: String,
    pub block: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TxPayload {
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct AddressPayload {
    pub addr_list: Vec<String>,
}

/// A decoded protocol message.
#[derive(Debug, Clone)]
pub enum Message {
    Version(VersionPayload),
    GetBlocks(GetBlocksPayload),
    Inv(InvPayload),
    GetData(GetDataPayload),
    Block(BlockPayload),
    Tx(TxPayload),
    Address(AddressPayload),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::GetBlocks(_) => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::Address(_) => "address",
        }
    }

    /// Frame the message: 12-byte zero-padded command then the payload bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut frame = command_to_bytes(self.command())?.to_vec();
        let payload = match self {
            Message::Version(p) => serialize(p)?,
            Message::GetBlocks(p) => serialize(p)?,
            Message::Inv(p) => serialize(p)?,
            Message::GetData(p) => serialize(p)?,
            Message::Block(p) => serialize(p)?,
            Message::Tx(p) => serialize(p)?,
            Message::Address(p) => serialize(p)?,
        };
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    pub fn decode(frame: &[u8]) -> Result<Message> {
        if frame.len() < COMMAND_LEN {
            return Err(LedgerError::Network(format!(
                "frame too short: {} bytes",
                frame.len()
            )));
        }
        let (command_bytes, payload) = frame.split_at(COMMAND_LEN);
        let command = bytes_to_command(command_bytes);
        let message = match command.as_str() {
            "version" => Message::Version(deserialize(payload)?),
            "getblocks" => Message::GetBlocks(deserialize(payload)?),
            "inv" => Message::Inv(deserialize(payload)?),
            "getdata" => Message::GetData(deserialize(payload)?),
            "block" => Message::Block(deserialize(payload)?),
            "tx" => Message::Tx(deserialize(payload)?),
            "address" => Message::Address(deserialize(payload)?),
            other => {
                return Err(LedgerError::Network(format!(
                    "unknown command: {other:?}"
                )))
            }
        };
        Ok(message)
    }
}

fn command_to_bytes(command: &str) -> Result<[u8; COMMAND_LEN]> {
    if command.len() > COMMAND_LEN {
        return Err(LedgerError::Network(format!(
            "command too long: {command}"
        )));
    }
    let mut bytes = [0u8; COMMAND_LEN];
    bytes[..command.len()].copy_from_slice(command.as_bytes());
    Ok(bytes)
}

fn bytes_to_command(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_padding_round_trip() {
        let bytes = command_to_bytes("inv").unwrap();
        assert_eq!(bytes.len(), COMMAND_LEN);
        assert_eq!(&bytes[..3], b"inv");
        assert!(bytes[3..].iter().all(|&b| b == 0));
        assert_eq!(bytes_to_command(&bytes), "inv");
    }

    #[test]
    fn test_version_round_trip() {
        let msg = Message::Version(VersionPayload {
            addr_from: "127.0.0.1:2001".to_string(),
            version: NODE_VERSION,
            best_height: 7,
        });
        let frame = msg.encode().unwrap();
        match Message::decode(&frame).unwrap() {
            Message::Version(p) => {
                assert_eq!(p.addr_from, "127.0.0.1:2001");
                assert_eq!(p.version, NODE_VERSION);
                assert_eq!(p.best_height, 7);
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_inv_round_trip() {
        let msg = Message::Inv(InvPayload {
            addr_from: "127.0.0.1:2002".to_string(),
            kind: InvKind::Block,
            items: vec![vec![0xab; 32], vec![0xcd; 32]],
        });
        let frame = msg.encode().unwrap();
        match Message::decode(&frame).unwrap() {
            Message::Inv(p) => {
                assert_eq!(p.kind, InvKind::Block);
                assert_eq!(p.items.len(), 2);
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut frame = [0u8; COMMAND_LEN].to_vec();
        frame[..5].copy_from_slice(b"bogus");
        assert!(Message::decode(&frame).is_err());
    }

    #[test]
    fn test_short_frame_rejected() {
        assert!(Message::decode(b"inv").is_err());
    }
}
