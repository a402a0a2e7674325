//! Default cipher implementation using AES-256-GCM.

use crate::crypto::{Cipher, CipherError};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// HKDF context string binding derived keys to this artifact format.
const HKDF_INFO: &[u8] = b"linedb-backup-key-v1";
/// Fixed HKDF salt.
///
/// Passphrases are expected to carry their own entropy; a per-artifact salt
/// would have to travel outside the ciphertext, which the artifact format
/// does not do.
const HKDF_SALT: &[u8] = b"linedb.backup.salt.v1";

/// AES-256-GCM cipher keyed by passphrase.
///
/// The passphrase is expanded with HKDF-SHA256 into a 256-bit key. The
/// output format is `nonce (12 bytes) || ciphertext || tag (16 bytes)`;
/// the nonce is random per encryption.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCipher;

impl AesGcmCipher {
    /// Creates the default cipher.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn derive_key(key: &str) -> Result<[u8; KEY_SIZE], CipherError> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), key.as_bytes());
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut bytes)
            .map_err(|_| CipherError::new("key derivation failed"))?;
        Ok(bytes)
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8], key: &str) -> Result<Vec<u8>, CipherError> {
        let mut key_bytes = Self::derive_key(key)?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key_bytes));
        key_bytes.zeroize();

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::new("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8], key: &str) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(CipherError::new("ciphertext too short"));
        }

        let mut key_bytes = Self::derive_key(key)?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key_bytes));
        key_bytes.zeroize();

        let (nonce_bytes, body) = ciphertext.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, body)
            .map_err(|_| CipherError::new("decryption failed: wrong key or tampered data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = AesGcmCipher::new();
        let plaintext = b"line-delimited secrets";

        let encrypted = cipher.encrypt(plaintext, "passphrase").unwrap();
        assert_ne!(&encrypted[NONCE_SIZE..], plaintext.as_slice());

        let decrypted = cipher.decrypt(&encrypted, "passphrase").unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let cipher = AesGcmCipher::new();
        let encrypted = cipher.encrypt(b"data", "right").unwrap();
        assert!(cipher.decrypt(&encrypted, "wrong").is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = AesGcmCipher::new();
        let mut encrypted = cipher.encrypt(b"data", "key").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xff;
        assert!(cipher.decrypt(&encrypted, "key").is_err());
    }

    #[test]
    fn too_short_ciphertext_fails() {
        let cipher = AesGcmCipher::new();
        assert!(cipher.decrypt(&[0u8; 4], "key").is_err());
    }

    #[test]
    fn nonces_are_unique_per_encryption() {
        let cipher = AesGcmCipher::new();
        let a = cipher.encrypt(b"data", "key").unwrap();
        let b = cipher.encrypt(b"data", "key").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let cipher = AesGcmCipher::new();
        let encrypted = cipher.encrypt(b"", "key").unwrap();
        assert_eq!(cipher.decrypt(&encrypted, "key").unwrap(), Vec::<u8>::new());
    }
}
