//! Store format v1.
//!
//! V1 document:
//! ```text
//! {
//!   "format": "fieldseal",
//!   "version": 1,
//!   "meta": { "cipher": "aes-256-gcm", "kdf": { "algorithm": "pbkdf2-sha256", "iterations": 100000 }, "salt": "<base64>" },
//!   "collections": { "<name>": [ { ...record... } ] }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{MAGIC, StoreDocument, StoreMeta};
use crate::crypto::Salt;
use crate::error::StorageError;
use crate::record::Record;

/// Current file format version.
pub const VERSION_V1: u64 = 1;

#[derive(Serialize, Deserialize)]
struct DocumentV1 {
    format: String,
    version: u64,
    #[serde(default)]
    meta: StoreMeta,
    #[serde(default)]
    collections: BTreeMap<String, Vec<Record>>,
}

/// Parses a v1 store document.
///
/// # Errors
///
/// Returns an error if the document shape or its key settings are invalid.
pub fn parse(value: Value) -> Result<StoreDocument, StorageError> {
    let doc: DocumentV1 = serde_json::from_value(value)?;

    if let Some(kdf) = &doc.meta.kdf {
        kdf.validate()
            .map_err(|e| StorageError::Format(e.to_string()))?;
    }
    if let Some(salt) = &doc.meta.salt {
        Salt::decode(salt).map_err(|e| StorageError::Format(format!("salt: {e}")))?;
    }

    Ok(StoreDocument::from_parts(doc.version, doc.meta, doc.collections))
}

/// Serializes a store document to v1 JSON bytes.
///
/// # Errors
///
/// Returns an error if the version is not v1.
pub fn serialize(doc: &StoreDocument) -> Result<Vec<u8>, StorageError> {
    if doc.version() != VERSION_V1 {
        return Err(StorageError::Format("wrong version for v1 serializer".into()));
    }

    let out = DocumentV1 {
        format: MAGIC.to_string(),
        version: VERSION_V1,
        meta: doc.meta().clone(),
        collections: doc.collections().clone(),
    };
    Ok(serde_json::to_vec_pretty(&out)?)
}
