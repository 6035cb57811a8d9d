//! Field-level envelope encryption for structured records.
//!
//! The building blocks, leaves first:
//!
//! - [`codec`]: bytes to base64 text and back
//! - [`crypto::kdf`]: passphrase + salt to a 256-bit key (PBKDF2-HMAC-SHA256
//!   by default, Argon2id optional)
//! - [`crypto::key`]: random keys, key export and import
//! - [`crypto::aead`]: authenticated encryption of text (AES-256-GCM by
//!   default, ChaCha20-Poly1305 optional)
//! - [`EncryptedStore`]: encrypts the sensitive fields of a record before
//!   handing it to a [`RecordStorage`], and decrypts them after a read
//!
//! ```no_run
//! use fieldseal::{Cipher, EncryptedStore, MemoryStorage, Query, generate_key};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let key = generate_key()?;
//! let store = EncryptedStore::new(MemoryStorage::new(), Cipher::default());
//!
//! let row = json!({ "id": "1", "name": "Alice", "ssn": "123-45-6789" });
//! store.store_encrypted("profiles", row.as_object().unwrap().clone(), &["ssn"], &key)?;
//!
//! let rows = store.retrieve_decrypted("profiles", &Query::all(), &["ssn"], &key)?;
//! assert_eq!(rows[0].record()["ssn"], "123-45-6789");
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod facade;
pub mod format;
pub mod record;
pub mod storage;

pub use crate::codec::{decode_bytes, encode_bytes};
pub use crate::config::Config;
pub use crate::crypto::{
    Cipher, CipherSuite, DerivedKey, EncryptedPayload, KdfParams, Salt, SymmetricKey, decrypt,
    derive_key, derive_key_with, encrypt, export_key, generate_key, import_key,
};
pub use crate::error::{CryptoError, Error, StorageError};
pub use crate::facade::{EncryptedStore, SealOptions};
pub use crate::format::StoreMeta;
pub use crate::record::{DecryptedRecord, Query, Record, SealedField};
pub use crate::storage::{FileStorage, MemoryStorage, RecordStorage};

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Default location of the CLI's record store.
pub fn default_store_path() -> Result<std::path::PathBuf> {
    let project_dirs =
        ProjectDirs::from("", "", "fieldseal").context("could not determine platform directories")?;

    Ok(project_dirs.data_dir().join("store.json"))
}
