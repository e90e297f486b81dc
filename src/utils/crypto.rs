use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{LedgerError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp in seconds, as carried in block headers.
pub fn current_timestamp() -> Result<i64> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| LedgerError::Crypto(format!("system clock before epoch: {e}")))?
        .as_secs();
    i64::try_from(secs).map_err(|_| LedgerError::Crypto("timestamp overflow".to_string()))
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    context.finish().as_ref().to_vec()
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn base58_decode(data: &str) -> Result<Vec<u8>> {
    bs58::decode(data)
        .into_vec()
        .map_err(|e| LedgerError::InvalidAddress(format!("invalid base58 encoding: {e}")))
}

/// Generate a fresh ECDSA P-256 key pair, returned in PKCS#8 form.
pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| LedgerError::Crypto(format!("key pair generation failed: {e}")))?;
    Ok(pkcs8.as_ref().to_vec())
}

/// Sign a message with a PKCS#8-encoded P-256 key. The signature comes back
/// as fixed-width `r || s` bytes, so no length-guessing is needed on the
/// verifying side.
pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| LedgerError::Crypto(format!("invalid PKCS#8 key: {e}")))?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| LedgerError::Crypto(format!("signing failed: {e}")))?;
    Ok(signature.as_ref().to_vec())
}

/// Verify a fixed-width `r || s` signature against an uncompressed P-256
/// public key point.
pub fn ecdsa_p256_sha256_sign_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let peer_public_key =
        ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public_key);
    peer_public_key.verify(message, signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_digest_is_stable() {
        let a = sha256_digest(b"minichain");
        let b = sha256_digest(b"minichain");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, sha256_digest(b"minichain!"));
    }

    #[test]
    fn test_base58_round_trip() {
        let data = vec![0x00, 0x01, 0xfe, 0xff];
        let encoded = base58_encode(&data);
        assert_eq!(base58_decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_sign_and_verify() {
        let pkcs8 = new_key_pair().unwrap();
        let rng = SystemRandom::new();
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &pkcs8, &rng).unwrap();
        let public_key = ring::signature::KeyPair::public_key(&key_pair).as_ref().to_vec();

        let message = b"spend output 0";
        let signature = ecdsa_p256_sha256_sign_digest(&pkcs8, message).unwrap();
        assert!(ecdsa_p256_sha256_sign_verify(&public_key, &signature, message));

        let mut tampered = signature.clone();
        tampered[0] ^= 0x01;
        assert!(!ecdsa_p256_sha256_sign_verify(&public_key, &tampered, message));
        assert!(!ecdsa_p256_sha256_sign_verify(&public_key, &signature, b"spend output 1"));
    }
}
