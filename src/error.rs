//! Error types for the codec, crypto, storage and record layers.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the codec, key handling and cipher.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid base64 input: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKey { expected: usize, actual: usize },

    #[error("invalid salt length: expected {expected} bytes, got {actual}")]
    InvalidSalt { expected: usize, actual: usize },

    /// Wrong key, tampered ciphertext, corrupted nonce and truncated input
    /// all map here so callers cannot tell them apart.
    #[error("Failed to decrypt data. The encryption key may be incorrect.")]
    Authentication,

    #[error("invalid key derivation parameters: {0}")]
    InvalidKdfParams(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encryption,

    #[error("OS random generator unavailable")]
    RandomUnavailable,

    #[error("decrypted data is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors raised by a [`RecordStorage`](crate::storage::RecordStorage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid store file: {0}")]
    Format(String),

    #[error("store already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("store does not exist at {}", .0.display())]
    Missing(PathBuf),

    #[error("record '{id}' not found in '{collection}'")]
    NotFound { collection: String, id: String },

    #[error("record '{id}' already exists in '{collection}'")]
    Conflict { collection: String, id: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors returned by the encrypted record facade.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to serialize field '{field}': {source}")]
    Serialization {
        field: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("record has no '{0}' field to bind encrypted fields to")]
    MissingRecordId(String),

    #[error("id field '{0}' cannot be encrypted")]
    SealedIdField(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
