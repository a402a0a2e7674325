//! Cipher capability for backup encryption.
//!
//! The cipher is a pluggable collaborator: it returns structured errors
//! rather than panicking, and the core converts those into
//! `EncryptionFailed`/`DecryptionFailed`.

mod aes;

pub use aes::AesGcmCipher;

use std::fmt;

/// A handled cipher failure.
///
/// This is a result value, not an exception: implementations report
/// failures (bad key, tampered ciphertext, malformed input) through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherError {
    message: String,
}

impl CipherError {
    /// Creates a cipher error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the failure description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CipherError {}

/// Encrypt/decrypt capability over backup artifacts.
///
/// Keys are caller-supplied passphrases; how they are expanded into cipher
/// key material is up to the implementation. Artifacts are bytes, not
/// text - gzip and AES output are both binary.
pub trait Cipher: Send + Sync {
    /// Encrypts `plaintext` under `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`CipherError`] describing the failure.
    fn encrypt(&self, plaintext: &[u8], key: &str) -> Result<Vec<u8>, CipherError>;

    /// Decrypts `ciphertext` under `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`CipherError`] if the key is wrong, the ciphertext was
    /// tampered with, or the input is malformed.
    fn decrypt(&self, ciphertext: &[u8], key: &str) -> Result<Vec<u8>, CipherError>;
}
