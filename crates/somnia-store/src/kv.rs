use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use somnia_types::{Collection, StoredValue};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::memory::Rows;
use crate::selector::StorageMode;
use crate::traits::{key_of, RecordBackend};

/// Flat string key-value storage.
///
/// Holds settings (`lastSyncTime`, `encryptionEnabled`), the legacy
/// collection arrays read by the migrator, and, in the fallback tier, the
/// collections themselves.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove a key. Returns `true` if it existed.
    fn remove_item(&self, key: &str) -> StoreResult<bool>;

    /// All keys, sorted.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Whether values outlive the process.
    fn is_durable(&self) -> bool;
}

fn validate_key(key: &str) -> StoreResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// One file per key inside a directory. Writes are atomic renames.
pub struct FileKvStore {
    dir: PathBuf,
    fsync: bool,
}

impl FileKvStore {
    /// Open (or create) the store directory and check it is writable.
    pub fn open(dir: &Path, fsync: bool) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        drop(NamedTempFile::new_in(dir)?);
        debug!(dir = %dir.display(), "key-value store opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            fsync,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl KeyValueStore for FileKvStore {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        validate_key(key)?;
        match fs::read_to_string(self.dir.join(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        validate_key(key)?;
        let mut staged = NamedTempFile::new_in(&self.dir)?;
        staged.write_all(value.as_bytes())?;
        if self.fsync {
            staged.as_file().sync_all()?;
        }
        staged.persist(self.dir.join(key)).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StoreResult<bool> {
        validate_key(key)?;
        match fs::remove_file(self.dir.join(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_key(name).is_ok() {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn is_durable(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for FileKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKvStore").field("dir", &self.dir).finish()
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local key-value store.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    items: RwLock<BTreeMap<String, String>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKvStore {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.items.read().expect("lock poisoned").get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        validate_key(key)?;
        self.items
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StoreResult<bool> {
        Ok(self
            .items
            .write()
            .expect("lock poisoned")
            .remove(key)
            .is_some())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.items.read().expect("lock poisoned").keys().cloned().collect())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Record backend over a key-value store
// ---------------------------------------------------------------------------

/// Stores each collection as one JSON array under its flat key.
///
/// Every write rewrites the collection's array; fine for journal-sized
/// collections, not for blobs.
pub struct KvBackend {
    kv: Arc<dyn KeyValueStore>,
    write: Mutex<()>,
}

impl KvBackend {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write: Mutex::new(()),
        }
    }

    fn load(&self, collection: Collection) -> StoreResult<Rows> {
        match self.kv.get_item(collection.kv_key())? {
            None => Ok(Rows::default()),
            Some(raw) => {
                let values: Vec<StoredValue> = serde_json::from_str(&raw)?;
                Ok(Rows::from_values(values))
            }
        }
    }

    fn save(&self, collection: Collection, rows: &Rows) -> StoreResult<()> {
        let raw = serde_json::to_string(rows.values())?;
        self.kv.set_item(collection.kv_key(), &raw)
    }

    fn modify<T>(&self, collection: Collection, f: impl FnOnce(&mut Rows) -> T) -> StoreResult<T> {
        let _guard = self.write.lock().expect("kv write mutex poisoned");
        let mut rows = self.load(collection)?;
        let out = f(&mut rows);
        self.save(collection, &rows)?;
        Ok(out)
    }
}

impl RecordBackend for KvBackend {
    fn mode(&self) -> StorageMode {
        if self.kv.is_durable() {
            StorageMode::FallbackKv
        } else {
            StorageMode::MemoryOnly
        }
    }

    fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<StoredValue>> {
        Ok(self.load(collection)?.get(id).cloned())
    }

    fn get_all(&self, collection: Collection) -> StoreResult<Vec<StoredValue>> {
        Ok(self.load(collection)?.values().to_vec())
    }

    fn put(&self, collection: Collection, value: &StoredValue) -> StoreResult<()> {
        self.put_batch(collection, std::slice::from_ref(value))
    }

    fn put_batch(&self, collection: Collection, values: &[StoredValue]) -> StoreResult<()> {
        for value in values {
            key_of(value)?;
        }
        self.modify(collection, |rows| {
            for value in values {
                rows.upsert(value.clone());
            }
        })
    }

    fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        let _guard = self.write.lock().expect("kv write mutex poisoned");
        let mut rows = self.load(collection)?;
        if !rows.remove(id) {
            return Ok(false);
        }
        self.save(collection, &rows)?;
        Ok(true)
    }

    fn replace(&self, collection: Collection, values: &[StoredValue]) -> StoreResult<()> {
        for value in values {
            key_of(value)?;
        }
        let rows = Rows::from_values(values.to_vec());
        let _guard = self.write.lock().expect("kv write mutex poisoned");
        self.save(collection, &rows)
    }
}

impl std::fmt::Debug for KvBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvBackend")
            .field("durable", &self.kv.is_durable())
            .finish()
    }
}
