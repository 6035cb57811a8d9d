//! Storage collaborators for the encrypted record facade.
//!
//! The facade never touches persistence itself; it hands sealed records to a
//! [`RecordStorage`] and reads them back through one. Retry, timeout and
//! backpressure policy belong to the backend.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use crate::error::StorageError;
use crate::record::{Query, Record, id_text};

mod file;

pub use file::FileStorage;

/// Default name of the primary key field.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Persistence backend for records.
pub trait RecordStorage {
    /// Name of the field holding each record's id.
    fn id_field(&self) -> &str;

    /// Inserts a record, assigning an id when it has none, and returns the
    /// record as stored.
    fn write(&self, collection: &str, record: Record) -> Result<Record, StorageError>;

    /// Returns every record of `collection` matching `query`.
    fn read(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StorageError>;

    /// Merges `fields` into the record with the given id and returns the
    /// updated record. Fields not named in `fields` are left byte-identical.
    fn update(&self, collection: &str, id: &str, fields: Record) -> Result<Record, StorageError>;
}

/// In-process storage, mainly for tests and embedding.
#[derive(Debug)]
pub struct MemoryStorage {
    id_field: String,
    collections: Mutex<BTreeMap<String, Vec<Record>>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            id_field: DEFAULT_ID_FIELD.to_string(),
            collections: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Number of records held in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        let collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).map_or(0, Vec::len)
    }

    /// Raw stored form of a record, as the backend sees it.
    pub fn raw(&self, collection: &str, id: &str) -> Option<Record> {
        let collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        collections
            .get(collection)?
            .iter()
            .find(|r| r.get(&self.id_field).and_then(id_text).as_deref() == Some(id))
            .cloned()
    }
}

impl RecordStorage for MemoryStorage {
    fn id_field(&self) -> &str {
        &self.id_field
    }

    fn write(&self, collection: &str, record: Record) -> Result<Record, StorageError> {
        let mut collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        insert_record(&mut collections, &self.id_field, collection, record)
    }

    fn read(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StorageError> {
        let collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(select_records(&collections, collection, query))
    }

    fn update(&self, collection: &str, id: &str, fields: Record) -> Result<Record, StorageError> {
        let mut collections = self.collections.lock().unwrap_or_else(PoisonError::into_inner);
        merge_record(&mut collections, &self.id_field, collection, id, fields)
    }
}

/// Random hex id with 128 bits of entropy.
pub(crate) fn random_id() -> Result<String, StorageError> {
    let mut buf = [0u8; 16];
    getrandom::fill(&mut buf).map_err(|e| StorageError::Backend(format!("random id: {e}")))?;
    Ok(buf.iter().map(|b| format!("{b:02x}")).collect())
}

pub(crate) fn insert_record(
    collections: &mut BTreeMap<String, Vec<Record>>,
    id_field: &str,
    collection: &str,
    mut record: Record,
) -> Result<Record, StorageError> {
    let rows = collections.entry(collection.to_string()).or_default();

    let id = match record.get(id_field).and_then(id_text) {
        Some(id) => id,
        None => {
            let id = random_id()?;
            record.insert(id_field.to_string(), id.clone().into());
            id
        }
    };

    if rows
        .iter()
        .any(|r| r.get(id_field).and_then(id_text).as_deref() == Some(id.as_str()))
    {
        return Err(StorageError::Conflict {
            collection: collection.to_string(),
            id,
        });
    }

    rows.push(record.clone());
    Ok(record)
}

pub(crate) fn select_records(
    collections: &BTreeMap<String, Vec<Record>>,
    collection: &str,
    query: &Query,
) -> Vec<Record> {
    collections
        .get(collection)
        .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
        .unwrap_or_default()
}

pub(crate) fn merge_record(
    collections: &mut BTreeMap<String, Vec<Record>>,
    id_field: &str,
    collection: &str,
    id: &str,
    fields: Record,
) -> Result<Record, StorageError> {
    let not_found = || StorageError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    };

    let row = collections
        .get_mut(collection)
        .and_then(|rows| {
            rows.iter_mut()
                .find(|r| r.get(id_field).and_then(id_text).as_deref() == Some(id))
        })
        .ok_or_else(not_found)?;

    for (field, value) in fields {
        if field == id_field {
            continue;
        }
        row.insert(field, value);
    }
    Ok(row.clone())
}
