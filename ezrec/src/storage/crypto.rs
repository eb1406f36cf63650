//! Blob confidentiality: PBKDF2-HMAC-SHA256 key derivation and
//! AES-256-GCM authenticated encryption.
//!
//! Each recording gets its own random 32-byte salt and a fresh 12-byte
//! nonce per write; the GCM tag is authenticated before any plaintext is
//! returned, so a wrong passphrase and a tampered blob both surface as
//! `DecryptionFailed` rather than garbage data.

use crate::errors::{Result, RpaError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const SALT_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Derive a 256-bit key from the master passphrase and a per-recording salt.
pub fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key);
    key
}

pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Encrypt under a derived key. The returned buffer is ciphertext with the
/// 16-byte GCM tag appended.
pub fn encrypt(key: &[u8; 32], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| RpaError::Storage("invalid encryption key length".to_string()))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| RpaError::Storage("encryption failed".to_string()))
}

/// Authenticate and decrypt. Any tag mismatch, wrong passphrase or
/// tampered ciphertext alike, is `DecryptionFailed`.
pub fn decrypt(key: &[u8; 32], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| RpaError::Storage("invalid decryption key length".to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| RpaError::DecryptionFailed("authentication tag mismatch".to_string()))
}

/// SHA-256 content hash, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let salt = random_salt();
        let nonce = random_nonce();
        let key = derive_key("passphrase", &salt, 1000);
        let ciphertext = encrypt(&key, &nonce, b"payload").unwrap();
        assert_eq!(ciphertext.len(), b"payload".len() + TAG_LEN);
        let plaintext = decrypt(&key, &nonce, &ciphertext).unwrap();
        assert_eq!(plaintext, b"payload");
    }

    #[test]
    fn wrong_passphrase_fails_authentication() {
        let salt = random_salt();
        let nonce = random_nonce();
        let key = derive_key("p1", &salt, 1000);
        let ciphertext = encrypt(&key, &nonce, b"payload").unwrap();
        let wrong = derive_key("p2", &salt, 1000);
        assert!(matches!(
            decrypt(&wrong, &nonce, &ciphertext),
            Err(RpaError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let salt = random_salt();
        let nonce = random_nonce();
        let key = derive_key("p1", &salt, 1000);
        let mut ciphertext = encrypt(&key, &nonce, b"payload").unwrap();
        ciphertext[3] ^= 0x01;
        assert!(matches!(
            decrypt(&key, &nonce, &ciphertext),
            Err(RpaError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn derivation_is_deterministic_per_salt() {
        let salt = random_salt();
        assert_eq!(derive_key("p", &salt, 1000), derive_key("p", &salt, 1000));
        let other_salt = random_salt();
        assert_ne!(
            derive_key("p", &salt, 1000),
            derive_key("p", &other_salt, 1000)
        );
    }

    #[test]
    fn content_hash_is_stable_hex() {
        let h = content_hash(b"abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
