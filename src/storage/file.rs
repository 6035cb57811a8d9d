//! Single-file JSON record store.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use super::{DEFAULT_ID_FIELD, RecordStorage, insert_record, merge_record, select_records};
use crate::error::StorageError;
use crate::format::{self, StoreDocument, StoreMeta};
use crate::record::{Query, Record};

/// A [`RecordStorage`] persisting every collection in one JSON document.
///
/// Each mutation loads the document, applies the change and writes the
/// whole document back atomically. Writers within one process are
/// serialized; concurrent processes are not coordinated.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    id_field: String,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Creates a new FileStorage instance with the given path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            id_field: DEFAULT_ID_FIELD.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Returns `true` if the storage file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Returns the path to the storage file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates an empty store carrying `meta`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if the file is already there.
    pub fn init(&self, meta: StoreMeta) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.exists() {
            return Err(StorageError::AlreadyExists(self.path.clone()));
        }
        self.save(&StoreDocument::new(meta))?;
        debug!(path = %self.path.display(), "initialized record store");
        Ok(())
    }

    /// Loads and parses the whole store document.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Missing`] if the store was never initialized.
    pub fn load(&self) -> Result<StoreDocument, StorageError> {
        if !self.exists() {
            return Err(StorageError::Missing(self.path.clone()));
        }
        let data = fs::read(&self.path)?;
        format::parse(&data)
    }

    /// Key settings stored with the records.
    pub fn meta(&self) -> Result<StoreMeta, StorageError> {
        Ok(self.load()?.meta().clone())
    }

    /// Saves the document using an atomic write.
    ///
    /// This method ensures crash-safety by:
    /// 1. Writing data to a temporary file with random name
    /// 2. Syncing the temporary file to disk
    /// 3. Atomically replacing the old file with the new one
    /// 4. Syncing the parent directory to ensure the rename is persisted
    ///
    /// Creates parent directories if they don't exist.
    fn save(&self, doc: &StoreDocument) -> Result<(), StorageError> {
        let data = format::serialize(doc)?;

        if let Some(parent) = self.parent_dir() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.random_tmp_path()?;
        write_tmp_file(&tmp_path, |file| file.write_all(&data))?;

        if let Err(e) = self.atomic_replace(&tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        if let Some(parent) = self.parent_dir() {
            File::open(parent)?.sync_all()?;
        }

        Ok(())
    }

    fn parent_dir(&self) -> Option<&Path> {
        self.path.parent().filter(|p| !p.as_os_str().is_empty())
    }

    /// Generates a unique temporary file path in the same directory.
    ///
    /// Format: `filename.tmp.<randomhex>`
    fn random_tmp_path(&self) -> Result<PathBuf, StorageError> {
        let mut buf = [0u8; 8]; // 64 bit entropy
        getrandom::fill(&mut buf).map_err(|e| StorageError::Backend(format!("temp name: {e}")))?;

        let rand_string = buf.iter().map(|b| format!("{b:02x}")).collect::<String>();

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| StorageError::Backend("store path has no file name".into()))?
            .to_string_lossy();

        Ok(self.path.with_file_name(format!("{file_name}.tmp.{rand_string}")))
    }

    /// Atomically replaces the target file with the temporary file.
    ///
    /// Uses Windows `ReplaceFileW` API with `REPLACEFILE_WRITE_THROUGH` flag
    /// when the target exists; a plain rename creates it the first time.
    #[cfg(target_os = "windows")]
    fn atomic_replace(&self, tmp_path: &Path) -> Result<(), StorageError> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

        if !self.path.exists() {
            fs::rename(tmp_path, &self.path)?;
            return Ok(());
        }

        fn to_wide(s: &OsStr) -> Vec<u16> {
            s.encode_wide().chain(std::iter::once(0)).collect()
        }

        let target_w = to_wide(self.path.as_os_str());
        let tmp_w = to_wide(tmp_path.as_os_str());

        // SAFETY:
        // - Strings are valid UTF-16 and null-terminated
        // - Pointers remain valid during the call
        // - Windows does not retain the pointers after return
        let result = unsafe {
            ReplaceFileW(
                target_w.as_ptr(),
                tmp_w.as_ptr(),
                std::ptr::null(),
                REPLACEFILE_WRITE_THROUGH,
                std::ptr::null(),
                std::ptr::null(),
            )
        };

        if result == 0 {
            return Err(StorageError::Io(std::io::Error::last_os_error()));
        }

        Ok(())
    }

    /// Atomically replaces the target file with the temporary file.
    ///
    /// On Unix, `rename()` is atomic when both paths are on the same filesystem.
    #[cfg(not(target_os = "windows"))]
    fn atomic_replace(&self, tmp_path: &Path) -> Result<(), StorageError> {
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreDocument) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut doc = self.load()?;
        let out = f(&mut doc)?;
        self.save(&doc)?;
        Ok(out)
    }
}

/// Creates `tmp_path`, fills it and syncs it to disk. The file is removed
/// again if any step after creation fails.
fn write_tmp_file(
    tmp_path: &Path,
    fill: impl FnOnce(&mut File) -> io::Result<()>,
) -> Result<(), StorageError> {
    // fail if a file with the same name exists
    let mut tmp_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp_path)?;

    let written = fill(&mut tmp_file).and_then(|()| tmp_file.sync_all());
    drop(tmp_file);

    if let Err(e) = written {
        let _ = fs::remove_file(tmp_path);
        return Err(e.into());
    }
    Ok(())
}

impl RecordStorage for FileStorage {
    fn id_field(&self) -> &str {
        &self.id_field
    }

    fn write(&self, collection: &str, record: Record) -> Result<Record, StorageError> {
        let stored = self.mutate(|doc| {
            insert_record(doc.collections_mut(), &self.id_field, collection, record)
        })?;
        debug!(collection, "wrote record to file store");
        Ok(stored)
    }

    fn read(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StorageError> {
        let doc = self.load()?;
        let rows = select_records(doc.collections(), collection, query);
        debug!(collection, count = rows.len(), "read records from file store");
        Ok(rows)
    }

    fn update(&self, collection: &str, id: &str, fields: Record) -> Result<Record, StorageError> {
        let updated = self.mutate(|doc| {
            merge_record(doc.collections_mut(), &self.id_field, collection, id, fields)
        })?;
        debug!(collection, "updated record in file store");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::crypto::{CipherSuite, KdfParams, Salt};

    fn record(value: serde_json::Value) -> Record {
        value.as_object().unwrap().clone()
    }

    fn initialized(path: PathBuf) -> FileStorage {
        let storage = FileStorage::new(path);
        storage.init(StoreMeta::default()).unwrap();
        storage
    }

    #[test]
    fn init_creates_file_with_meta() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("store.json"));
        let meta = StoreMeta {
            cipher: CipherSuite::Aes256Gcm,
            kdf: Some(KdfParams::default()),
            salt: Some(Salt::from_bytes([4u8; 16]).encode()),
        };

        storage.init(meta.clone()).unwrap();

        assert!(storage.exists());
        assert_eq!(storage.meta().unwrap(), meta);
    }

    #[test]
    fn init_fails_if_store_exists() {
        let dir = tempdir().unwrap();
        let storage = initialized(dir.path().join("store.json"));
        assert!(matches!(
            storage.init(StoreMeta::default()),
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[test]
    fn load_fails_if_file_does_not_exist() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("missing.json"));
        assert!(matches!(storage.load(), Err(StorageError::Missing(_))));
        assert!(storage.read("users", &Query::all()).is_err());
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let storage = initialized(path.clone());
        storage
            .write("users", record(json!({ "id": "1", "name": "Alice" })))
            .unwrap();
        drop(storage);

        let reopened = FileStorage::new(path);
        let rows = reopened.read("users", &Query::all().eq("id", "1")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Alice");
    }

    #[test]
    fn update_rewrites_only_given_fields() {
        let dir = tempdir().unwrap();
        let storage = initialized(dir.path().join("store.json"));
        storage
            .write("users", record(json!({ "id": "1", "name": "Alice", "ssn": { "x": 1 } })))
            .unwrap();

        storage
            .update("users", "1", record(json!({ "name": "Bob" })))
            .unwrap();

        let rows = storage.read("users", &Query::all()).unwrap();
        assert_eq!(rows[0]["name"], "Bob");
        assert_eq!(rows[0]["ssn"], json!({ "x": 1 }));
    }

    #[test]
    fn failed_mutation_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let storage = initialized(path.clone());
        storage.write("users", record(json!({ "id": "1" }))).unwrap();
        let before = fs::read(&path).unwrap();

        assert!(storage.write("users", record(json!({ "id": "1" }))).is_err());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn random_tmp_path_has_same_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let storage = FileStorage::new(path.clone());

        let tmp = storage.random_tmp_path().unwrap();

        assert_eq!(tmp.parent(), path.parent());
        assert_ne!(tmp, path);
    }

    #[test]
    fn tmp_names_are_unique() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("store.json"));

        let a = storage.random_tmp_path().unwrap();
        let b = storage.random_tmp_path().unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn tmp_file_is_removed_after_success() {
        let dir = tempdir().unwrap();
        let storage = initialized(dir.path().join("store.json"));
        storage.write("users", record(json!({ "id": "1" }))).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], "store.json");
    }

    #[test]
    fn parent_directory_is_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("c").join("store.json");

        initialized(nested.clone());

        assert!(nested.exists());
    }

    #[test]
    fn corrupted_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"{\"format\":\"fieldseal\",\"version\":7}").unwrap();

        let storage = FileStorage::new(path);
        assert!(matches!(storage.load(), Err(StorageError::Format(_))));
    }

    #[test]
    fn tmp_file_is_removed_when_write_fails() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("store.json.tmp.0011");

        let err = write_tmp_file(&tmp, |file| {
            file.write_all(b"partial")?;
            Err(io::Error::other("disk full"))
        })
        .unwrap_err();

        assert!(matches!(err, StorageError::Io(_)));
        assert!(!tmp.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn tmp_file_is_synced_and_kept_on_success() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("store.json.tmp.0022");

        write_tmp_file(&tmp, |file| file.write_all(b"{}")).unwrap();

        assert_eq!(fs::read(&tmp).unwrap(), b"{}");
    }
}
