use crate::error::{LedgerError, Result};
use crate::utils::{base58_decode, base58_encode, new_key_pair, ripemd160_digest, sha256_digest};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::{Deserialize, Serialize};

/// Version byte prefixed to every address payload.
const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

/// An ECDSA P-256 key pair. The private key is held in PKCS#8 form; the
/// public key is the uncompressed curve point.
#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = new_key_pair()?;
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &pkcs8, &rng)
            .map_err(|e| LedgerError::Crypto(format!("invalid generated key: {e}")))?;
        let public_key = key_pair.public_key().as_ref().to_vec();
        Ok(Wallet { pkcs8, public_key })
    }

    /// Base58Check address: version byte, RIPEMD160(SHA256(public key)),
    /// 4-byte checksum.
    pub fn get_address(&self) -> String {
        convert_address(&hash_pub_key(&self.public_key))
    }

    pub fn get_public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }
}

pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    ripemd160_digest(&sha256_digest(pub_key))
}

fn checksum(payload: &[u8]) -> Vec<u8> {
    let digest = sha256_digest(&sha256_digest(payload));
    digest[0..ADDRESS_CHECK_SUM_LEN].to_vec()
}

/// Encode a public key hash as a Base58Check address.
pub fn convert_address(pub_key_hash: &[u8]) -> String {
    let mut payload = vec![VERSION];
    payload.extend_from_slice(pub_key_hash);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    base58_encode(&payload)
}

/// Decode an address and compare the trailing checksum against a recomputed
/// one.
pub fn validate_address(address: &str) -> bool {
    let payload = match base58_decode(address) {
        Ok(payload) => payload,
        Err(_) => return false,
    };
    if payload.len() < ADDRESS_CHECK_SUM_LEN + 1 {
        return false;
    }
    let (versioned, claimed) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    checksum(versioned) == claimed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();
        assert!(validate_address(&address));

        let payload = base58_decode(&address).unwrap();
        let pub_key_hash = &payload[1..payload.len() - ADDRESS_CHECK_SUM_LEN];
        assert_eq!(pub_key_hash, hash_pub_key(wallet.get_public_key()));
        assert_eq!(convert_address(pub_key_hash), address);
    }

    #[test]
    fn test_tampered_checksum_is_rejected() {
        let wallet = Wallet::new().unwrap();
        let mut payload = base58_decode(&wallet.get_address()).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        assert!(!validate_address(&crate::utils::base58_encode(&payload)));
    }

    #[test]
    fn test_garbage_addresses_are_rejected() {
        assert!(!validate_address(""));
        assert!(!validate_address("0OIl"));
        assert!(!validate_address("abc"));
    }
}
