use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{KEY_SIZE, NONCE_SIZE};

/// Errors from the symmetric primitives. `InvalidKey` and `InvalidCiphertext`
/// indicate caller misuse; `DecryptionFailed` is the normal outcome for a
/// wrong key or tampered blob.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key size: expected {KEY_SIZE} bytes")]
    InvalidKey,

    #[error("ciphertext too short")]
    InvalidCiphertext,

    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,
}

/// Encrypts plaintext with AES-256-GCM under a 32-byte key.
///
/// A fresh nonce is drawn from the system CSPRNG on every call; the output
/// layout is `nonce || ciphertext || tag`. Each session key encrypts at most
/// a handful of short messages, so random nonces carry no realistic
/// collision risk.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypts a `nonce || ciphertext || tag` blob produced by [`encrypt`].
///
/// Tag verification failure (tampering, wrong key) surfaces as
/// `DecryptionFailed`.
pub fn decrypt(key: &[u8], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey);
    }
    if blob.len() < NONCE_SIZE {
        return Err(CryptoError::InvalidCiphertext);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Expands a shared secret into a 32-byte key with HKDF-SHA-256.
pub fn derive_key(secret: &[u8], salt: Option<&[u8]>, info: &[u8]) -> [u8; KEY_SIZE] {
    let hkdf = Hkdf::<Sha256>::new(salt, secret);
    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut key)
        .expect("32 bytes is a valid length for HKDF");
    key
}

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::default();
    hasher.update(data);
    hasher.finalize().into()
}

/// Cryptographically secure random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // ============================================================================
    // Basic Encryption/Decryption Tests
    // ============================================================================

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [0u8; KEY_SIZE];
        let plaintext = b"Hello, World! This is a test message.";

        let encrypted = encrypt(&key, plaintext).expect("Encryption should succeed");

        // nonce + ciphertext + 16-byte tag
        assert_eq!(encrypted.len(), NONCE_SIZE + plaintext.len() + 16);

        let decrypted = decrypt(&key, &encrypted).expect("Decryption should succeed");
        assert_eq!(&decrypted[..], plaintext);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let key1 = [0u8; KEY_SIZE];
        let key2 = [1u8; KEY_SIZE];
        let plaintext = b"Secret message";

        let encrypted = encrypt(&key1, plaintext).expect("Encryption should succeed");

        let result = decrypt(&key2, &encrypted);
        assert_eq!(result, Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [42u8; KEY_SIZE];
        let plaintext = b"Important data";

        let mut encrypted = encrypt(&key, plaintext).expect("Encryption should succeed");
        encrypted[NONCE_SIZE + 2] ^= 0xFF;

        let result = decrypt(&key, &encrypted);
        assert_eq!(result, Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let key = [42u8; KEY_SIZE];
        let plaintext = b"Important data";

        let mut encrypted = encrypt(&key, plaintext).expect("Encryption should succeed");
        encrypted[0] ^= 0x01;

        let result = decrypt(&key, &encrypted);
        assert_eq!(result, Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_tampered_auth_tag_fails() {
        let key = [88u8; KEY_SIZE];
        let plaintext = b"Authenticated data";

        let mut encrypted = encrypt(&key, plaintext).expect("Encryption should succeed");
        let len = encrypted.len();
        encrypted[len - 1] ^= 0x01;

        let result = decrypt(&key, &encrypted);
        assert_eq!(result, Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_wrong_key_size_rejected() {
        let short_key = [0u8; 16];
        assert_eq!(encrypt(&short_key, b"data"), Err(CryptoError::InvalidKey));
        assert_eq!(decrypt(&short_key, &[0u8; 64]), Err(CryptoError::InvalidKey));
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let key = [7u8; KEY_SIZE];
        // Shorter than a nonce: structurally invalid, not just unauthenticated.
        assert_eq!(decrypt(&key, &[0u8; 11]), Err(CryptoError::InvalidCiphertext));
    }

    #[test]
    fn test_encrypt_empty_data() {
        let key = [42u8; KEY_SIZE];

        let encrypted = encrypt(&key, b"").expect("Encryption of empty data should succeed");
        assert_eq!(encrypted.len(), NONCE_SIZE + 16);

        let decrypted = decrypt(&key, &encrypted).expect("Decryption should succeed");
        assert!(decrypted.is_empty());
    }

    // ============================================================================
    // Nonce Uniqueness Tests
    // ============================================================================

    #[test]
    fn test_fresh_nonce_per_call() {
        let key = [77u8; KEY_SIZE];
        let plaintext = b"Same plaintext both times";

        let encrypted1 = encrypt(&key, plaintext).expect("Encryption should succeed");
        let encrypted2 = encrypt(&key, plaintext).expect("Encryption should succeed");

        assert_ne!(
            &encrypted1[..NONCE_SIZE],
            &encrypted2[..NONCE_SIZE],
            "Each call should draw a fresh nonce"
        );
        assert_ne!(encrypted1, encrypted2);
    }

    // ============================================================================
    // Key Derivation and Hashing Tests
    // ============================================================================

    #[test]
    fn test_derive_key_deterministic() {
        let secret = b"shared secret from pake";
        let key1 = derive_key(secret, None, b"file-encryption");
        let key2 = derive_key(secret, None, b"file-encryption");
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_derive_key_separates_info() {
        let secret = b"shared secret from pake";
        let key1 = derive_key(secret, None, b"context-a");
        let key2 = derive_key(secret, None, b"context-b");
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        let digest = sha256(b"abc");
        assert_eq!(
            digest[..4],
            [0xba, 0x78, 0x16, 0xbf],
            "digest should match the standard test vector prefix"
        );
    }

    #[test]
    fn test_random_bytes_distinct() {
        let a = random_bytes(32);
        let b = random_bytes(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    // ============================================================================
    // Property Tests
    // ============================================================================

    proptest! {
        /// Round-trip holds for arbitrary keys and messages.
        #[test]
        fn prop_roundtrip(key in prop::array::uniform32(any::<u8>()),
                          message in prop::collection::vec(any::<u8>(), 0..4096)) {
            let encrypted = encrypt(&key, &message).unwrap();
            let decrypted = decrypt(&key, &encrypted).unwrap();
            prop_assert_eq!(decrypted, message);
        }

        /// Any single-bit mutation of the blob breaks authentication.
        #[test]
        fn prop_single_bit_flip_detected(key in prop::array::uniform32(any::<u8>()),
                                         message in prop::collection::vec(any::<u8>(), 1..256),
                                         flip in any::<u16>()) {
            let mut encrypted = encrypt(&key, &message).unwrap();
            let bit = flip as usize % (encrypted.len() * 8);
            encrypted[bit / 8] ^= 1 << (bit % 8);
            prop_assert_eq!(decrypt(&key, &encrypted), Err(CryptoError::DecryptionFailed));
        }
    }
}
