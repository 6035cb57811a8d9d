//! Encrypted record facade.
//!
//! Seals the sensitive fields of a record before it reaches storage and
//! opens them again after a read. Everything else in the record passes
//! through as plaintext.

use tracing::debug;

use crate::crypto::{Cipher, SymmetricKey};
use crate::error::{Error, Result};
use crate::record::{DecryptedRecord, FieldBinding, Query, Record, id_text, open_fields, seal_fields};
use crate::storage::RecordStorage;

/// Behaviour switches for [`EncryptedStore`].
///
/// The id field itself comes from the storage backend, see
/// [`RecordStorage::id_field`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SealOptions {
    /// Bind `(collection, field, id)` into each field's authentication tag so
    /// a ciphertext copied to another field or record fails to decrypt.
    pub bind_context: bool,
}

/// Field-level encryption in front of a [`RecordStorage`].
#[derive(Debug)]
pub struct EncryptedStore<S> {
    storage: S,
    cipher: Cipher,
    options: SealOptions,
}

impl<S: RecordStorage> EncryptedStore<S> {
    pub fn new(storage: S, cipher: Cipher) -> Self {
        Self::with_options(storage, cipher, SealOptions::default())
    }

    pub fn with_options(storage: S, cipher: Cipher, options: SealOptions) -> Self {
        Self {
            storage,
            cipher,
            options,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    pub fn options(&self) -> &SealOptions {
        &self.options
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Encrypts the sensitive fields of `record` and writes it.
    ///
    /// Listed fields missing from the record are skipped. Returns the record
    /// as stored, with its sensitive fields sealed.
    ///
    /// # Errors
    ///
    /// - [`Error::SealedIdField`] if the id field is listed as sensitive
    /// - [`Error::MissingRecordId`] if context binding is on and the record
    ///   has no id
    /// - [`Error::Storage`] if the write fails
    pub fn store_encrypted<F: AsRef<str>>(
        &self,
        collection: &str,
        mut record: Record,
        sensitive_fields: &[F],
        key: &SymmetricKey,
    ) -> Result<Record> {
        self.check_id_not_sensitive(sensitive_fields)?;
        let id = self.bound_id(&record)?;
        let binding = id.as_deref().map(|id| FieldBinding { collection, id });

        let sealed = seal_fields(&self.cipher, &mut record, sensitive_fields, key, binding)?;
        debug!(collection, sealed, "storing record");

        Ok(self.storage.write(collection, record)?)
    }

    /// Reads matching records and decrypts their sensitive fields.
    ///
    /// A field that fails to decrypt does not fail the read: it stays sealed
    /// and is reported in [`DecryptedRecord::failures`]. Use
    /// [`DecryptedRecord::into_record`] to treat any failure as fatal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the read fails.
    pub fn retrieve_decrypted<F: AsRef<str>>(
        &self,
        collection: &str,
        query: &Query,
        sensitive_fields: &[F],
        key: &SymmetricKey,
    ) -> Result<Vec<DecryptedRecord>> {
        let rows = self.storage.read(collection, query)?;
        debug!(collection, count = rows.len(), "decrypting records");

        let decrypted = rows
            .into_iter()
            .map(|mut record| {
                let id = record.get(self.storage.id_field()).and_then(id_text);
                let binding = match (&id, self.options.bind_context) {
                    (Some(id), true) => Some(FieldBinding { collection, id }),
                    _ => None,
                };
                let failures = open_fields(&self.cipher, &mut record, sensitive_fields, key, binding);
                if !failures.is_empty() {
                    debug!(collection, failed = failures.len(), "some fields failed to decrypt");
                }
                DecryptedRecord::new(record, failures)
            })
            .collect();

        Ok(decrypted)
    }

    /// Encrypts the sensitive fields present in a partial update and applies
    /// it to the record with `id`.
    ///
    /// Stored fields not named in `fields` are neither decrypted nor
    /// re-encrypted.
    pub fn update_encrypted<F: AsRef<str>>(
        &self,
        collection: &str,
        id: &str,
        mut fields: Record,
        sensitive_fields: &[F],
        key: &SymmetricKey,
    ) -> Result<Record> {
        self.check_id_not_sensitive(sensitive_fields)?;
        let binding = self
            .options
            .bind_context
            .then_some(FieldBinding { collection, id });

        let sealed = seal_fields(&self.cipher, &mut fields, sensitive_fields, key, binding)?;
        debug!(collection, sealed, "updating record");

        Ok(self.storage.update(collection, id, fields)?)
    }

    fn bound_id(&self, record: &Record) -> Result<Option<String>> {
        if !self.options.bind_context {
            return Ok(None);
        }
        let id_field = self.storage.id_field();
        record
            .get(id_field)
            .and_then(id_text)
            .map(Some)
            .ok_or_else(|| Error::MissingRecordId(id_field.to_string()))
    }

    // The backend locates records by the plaintext id.
    fn check_id_not_sensitive<F: AsRef<str>>(&self, sensitive_fields: &[F]) -> Result<()> {
        let id_field = self.storage.id_field();
        if sensitive_fields.iter().any(|f| f.as_ref() == id_field) {
            return Err(Error::SealedIdField(id_field.to_string()));
        }
        Ok(())
    }
}
