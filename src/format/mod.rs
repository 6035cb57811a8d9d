//! File format handling for the on-disk record store.
//!
//! Provides version-aware parsing and serialization of the store document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{CipherSuite, KdfParams};
use crate::error::StorageError;
use crate::record::Record;

pub mod v1;

/// Marker identifying a fieldseal store document.
pub const MAGIC: &str = "fieldseal";
/// Latest format version
pub const CURRENT_VERSION: u64 = v1::VERSION_V1;

/// Key material settings persisted with the records they protect.
///
/// `salt` and `kdf` are present when the store is unlocked with a
/// passphrase; a store used only with exported keys leaves them empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    #[serde(default)]
    pub cipher: CipherSuite,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

/// A parsed store document: metadata plus records grouped by collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreDocument {
    version: u64,
    meta: StoreMeta,
    collections: BTreeMap<String, Vec<Record>>,
}

impl StoreDocument {
    pub fn new(meta: StoreMeta) -> Self {
        Self {
            version: CURRENT_VERSION,
            meta,
            collections: BTreeMap::new(),
        }
    }

    pub(crate) fn from_parts(
        version: u64,
        meta: StoreMeta,
        collections: BTreeMap<String, Vec<Record>>,
    ) -> Self {
        Self {
            version,
            meta,
            collections,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    pub fn collections(&self) -> &BTreeMap<String, Vec<Record>> {
        &self.collections
    }

    pub(crate) fn collections_mut(&mut self) -> &mut BTreeMap<String, Vec<Record>> {
        &mut self.collections
    }
}

/// Parses a store document.
///
/// Automatically dispatches to the appropriate version parser.
///
/// # Errors
///
/// Returns [`StorageError::Format`] if:
/// - The data is not a JSON object
/// - The magic marker is missing or wrong
/// - The version is unsupported
pub fn parse(data: &[u8]) -> Result<StoreDocument, StorageError> {
    let value: Value = serde_json::from_slice(data)?;
    let Some(obj) = value.as_object() else {
        return Err(StorageError::Format("expected a JSON object".into()));
    };

    if obj.get("format").and_then(Value::as_str) != Some(MAGIC) {
        return Err(StorageError::Format("invalid magic".into()));
    }

    match obj.get("version").and_then(Value::as_u64) {
        Some(v1::VERSION_V1) => v1::parse(value),
        Some(other) => Err(StorageError::Format(format!("unsupported version: {other}"))),
        None => Err(StorageError::Format("missing version".into())),
    }
}

/// Serializes a store document.
///
/// # Errors
///
/// Returns an error if the version is unsupported.
pub fn serialize(doc: &StoreDocument) -> Result<Vec<u8>, StorageError> {
    match doc.version() {
        v1::VERSION_V1 => v1::serialize(doc),
        other => Err(StorageError::Format(format!("unsupported version: {other}"))),
    }
}
