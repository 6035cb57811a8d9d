//! Cryptographic primitives.
//!
//! Provides key derivation, key generation and transport, and
//! authenticated encryption of text payloads.

pub mod aead;
pub mod kdf;
pub mod key;

pub use aead::{Cipher, CipherSuite, EncryptedPayload, decrypt, encrypt};
pub use kdf::{DerivedKey, KdfParams, derive_key, derive_key_with};
pub use key::{Salt, SymmetricKey, export_key, generate_key, import_key};

use crate::error::CryptoError;

/// Length of the salt (16 bytes).
pub const SALT_LEN: usize = 16;
/// Length of the nonce (12 bytes for AES-GCM and ChaCha20-Poly1305).
pub const NONCE_LEN: usize = 12;
/// Length of the authentication tag appended to every ciphertext (16 bytes).
pub const TAG_LEN: usize = 16;
/// Length of the encryption key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;

/// Fill buffer with cryptographically secure random bytes
pub(crate) fn secure_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::fill(buf).map_err(|_| CryptoError::RandomUnavailable)
}
