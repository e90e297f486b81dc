use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Encode a value with bincode's standard configuration. Used for every
/// persisted record and wire payload in the ledger.
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let bytes = bincode::encode_to_vec(data, bincode::config::standard())?;
    Ok(bytes)
}

/// Decode a value previously produced by [`serialize`]. Trailing bytes are
/// ignored, which lets wire payloads ride behind a fixed-size header.
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let (data, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    #[derive(Debug, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct Record {
        id: u64,
        tag: String,
        payload: Vec<u8>,
    }

    #[test]
    fn test_round_trip() {
        let original = Record {
            id: 7,
            tag: "utxo".to_string(),
            payload: vec![1, 2, 3],
        };
        let bytes = serialize(&original).unwrap();
        let decoded: Record = deserialize(&bytes).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_deserialize_garbage_fails() {
        let result: Result<Record> = deserialize(&[0xff; 3]);
        assert!(result.is_err());
    }
}
