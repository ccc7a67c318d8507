use std::sync::{Arc, Mutex};

use somnia_crypto::{ciphertext_digest, KdfParams, PasswordFingerprint, Sealer};
use somnia_types::{
    format_timestamp_exact, now, parse_timestamp, Collection, Envelope, Record, StoredValue, Timestamp,
};
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

use crate::cache::DecryptedCache;
use crate::error::{StoreError, StoreResult};
use crate::password::PasswordProvider;
use crate::record_store::RecordStore;

/// Provider state sampled at the start of an operation.
struct Session {
    enabled: bool,
    sealer: Option<Arc<Sealer>>,
}

/// Encryption-transparent view over a [`RecordStore`].
///
/// Callers hand in and get back plain [`Record`]s. While encryption is
/// enabled, records of encryptable collections are sealed into envelopes on
/// the way down; envelopes are opened on the way up whatever the current
/// flag says, so a collection may mix both forms. Decrypted records are
/// cached per session password.
pub struct Vault {
    store: RecordStore,
    provider: Arc<dyn PasswordProvider>,
    kdf: KdfParams,
    cache: DecryptedCache,
    sealer: Mutex<Option<Arc<Sealer>>>,
}

impl Vault {
    pub fn new(store: RecordStore, provider: Arc<dyn PasswordProvider>, kdf: KdfParams) -> Self {
        Self {
            store,
            provider,
            kdf,
            cache: DecryptedCache::new(),
            sealer: Mutex::new(None),
        }
    }

    /// The underlying record store.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Whether writes to `collection` are currently sealed.
    pub fn should_encrypt(&self, collection: Collection) -> bool {
        self.provider.encryption_enabled() && collection.is_encryptable() && !collection.is_blob()
    }

    /// Drop every cached plaintext.
    pub fn invalidate_cache(&self) {
        self.cache.clear();
        debug!("decrypted cache cleared");
    }

    /// Number of cached plaintexts.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    // ---- Reads ----

    /// Load one record.
    ///
    /// `Ok(None)` if it does not exist. An envelope that cannot be opened is
    /// an error: [`StoreError::PasswordRequired`] without a password,
    /// [`StoreError::Decryption`] for a wrong password or damaged data.
    pub fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Record>> {
        let session = self.session();
        match self.store.get(collection, id)? {
            Some(value) => self.open(&session, collection, value).map(Some),
            None => Ok(None),
        }
    }

    /// Load every record of a collection.
    ///
    /// Values are opened one by one; a value that fails to decrypt is logged
    /// and skipped. Meeting an envelope with no password in the session
    /// fails the whole load with [`StoreError::PasswordRequired`].
    pub fn get_all(&self, collection: Collection) -> StoreResult<Vec<Record>> {
        let session = self.session();
        let values = self.store.get_all(collection)?;
        let total = values.len();
        let mut records = Vec::with_capacity(total);
        for value in values {
            match self.open(&session, collection, value) {
                Ok(record) => records.push(record),
                Err(StoreError::PasswordRequired) => return Err(StoreError::PasswordRequired),
                Err(e) => warn!(%collection, error = %e, "skipping unreadable record"),
            }
        }
        if records.len() < total {
            warn!(%collection, loaded = records.len(), total, "partial load");
        }
        Ok(records)
    }

    // ---- Writes ----

    /// Upsert one record. Returns `false` (and logs) on any failure.
    pub fn put(&self, collection: Collection, record: Record) -> bool {
        report(collection, "put", self.try_put(collection, record))
    }

    pub fn try_put(&self, collection: Collection, record: Record) -> StoreResult<()> {
        let session = self.session();
        let value = self.seal(&session, collection, record)?;
        let id = value.id().unwrap_or_default().to_string();
        self.store.put(collection, value)?;
        self.cache.remove(collection, &id);
        Ok(())
    }

    /// Replace the whole collection. Returns `false` (and logs) on any
    /// failure, in which case the collection is unchanged.
    pub fn replace_all(&self, collection: Collection, records: Vec<Record>) -> bool {
        report(collection, "replace_all", self.try_replace_all(collection, records))
    }

    pub fn try_replace_all(&self, collection: Collection, records: Vec<Record>) -> StoreResult<()> {
        let session = self.session();
        let values = records
            .into_iter()
            .map(|record| self.seal(&session, collection, record))
            .collect::<StoreResult<Vec<_>>>()?;
        self.store.replace_all(collection, values)?;
        self.cache.remove_collection(collection);
        Ok(())
    }

    /// Delete one record. Returns `false` (and logs) on failure; deleting a
    /// missing record succeeds.
    pub fn delete(&self, collection: Collection, id: &str) -> bool {
        report(collection, "delete", self.try_delete(collection, id).map(|_| ()))
    }

    /// Returns `true` if the record existed.
    pub fn try_delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        self.session();
        let existed = self.store.delete(collection, id)?;
        self.cache.remove(collection, id);
        Ok(existed)
    }

    /// Re-save every value of a collection in the form the current policy
    /// asks for: seal plain records after encryption was enabled, or open
    /// envelopes after it was disabled. Values already in the right form are
    /// left byte-identical. Fails without writing if any value that needs
    /// converting cannot be opened. Returns the number converted.
    pub fn rewrite_collection(&self, collection: Collection) -> StoreResult<usize> {
        let session = self.session();
        let target_encrypted = session.enabled && collection.is_encryptable() && !collection.is_blob();
        let mut converted = 0;
        let mut values = Vec::new();
        for value in self.store.get_all(collection)? {
            if value.is_encrypted() == target_encrypted {
                values.push(value);
                continue;
            }
            let record = self.open(&session, collection, value)?;
            values.push(self.seal(&session, collection, record)?);
            converted += 1;
        }
        if converted > 0 {
            self.store.replace_all(collection, values)?;
            self.cache.remove_collection(collection);
        }
        debug!(%collection, converted, encrypted = target_encrypted, "collection rewritten");
        Ok(converted)
    }

    // ---- Internals ----

    /// Sample the provider and keep the cache bound to the current password.
    fn session(&self) -> Session {
        let enabled = self.provider.encryption_enabled();
        let password = self.provider.encryption_password().map(Zeroizing::new);
        let sealer = password.as_ref().map(|pw| self.sealer_for(pw));
        if sealer.is_none() {
            *self.sealer.lock().expect("sealer mutex poisoned") = None;
        }

        let owner = if enabled {
            sealer.as_ref().map(|s| s.fingerprint())
        } else {
            None
        };
        if self.cache.bind(owner) {
            debug!("decrypted cache invalidated");
        }
        Session { enabled, sealer }
    }

    fn sealer_for(&self, password: &str) -> Arc<Sealer> {
        let fingerprint = PasswordFingerprint::of(password);
        let mut slot = self.sealer.lock().expect("sealer mutex poisoned");
        match slot.as_ref() {
            Some(sealer) if sealer.fingerprint() == fingerprint => Arc::clone(sealer),
            _ => {
                debug!(fingerprint = %fingerprint.short_hex(), "new session sealer");
                let sealer = Arc::new(Sealer::new(password, self.kdf));
                *slot = Some(Arc::clone(&sealer));
                sealer
            }
        }
    }

    fn seal(&self, session: &Session, collection: Collection, record: Record) -> StoreResult<StoredValue> {
        record.validate()?;
        let encrypt = session.enabled && collection.is_encryptable() && !collection.is_blob();
        if !encrypt {
            return Ok(StoredValue::Plain(record));
        }
        let sealer = session.sealer.as_ref().ok_or(StoreError::PasswordRequired)?;

        let plaintext = Zeroizing::new(record.to_canonical_json()?);
        let data = sealer.seal(plaintext.as_bytes()).map_err(StoreError::Crypto)?;
        let created = record
            .created()
            .or_else(|| record.timestamp())
            .unwrap_or_else(now);
        let modified = record.modified().or_else(|| record.created()).unwrap_or(created);
        let id = record.id().unwrap_or_default();
        Ok(Envelope::new(id, data, created, modified).into())
    }

    fn open(&self, session: &Session, collection: Collection, value: StoredValue) -> StoreResult<Record> {
        let envelope = match value {
            StoredValue::Plain(record) if record.claims_encrypted() => {
                return Err(StoreError::Corrupt {
                    collection,
                    id: record.id().unwrap_or_default().to_string(),
                    reason: "envelope marker on a value that is not a valid envelope".into(),
                });
            }
            StoredValue::Plain(record) => return Ok(record),
            StoredValue::Encrypted(envelope) => envelope,
        };

        let sealer = session.sealer.as_ref().ok_or(StoreError::PasswordRequired)?;
        let digest = ciphertext_digest(&envelope.data);
        if let Some(record) = self.cache.get(collection, &envelope.id, &digest) {
            return Ok(record);
        }

        let corrupt = |reason: String| StoreError::Corrupt {
            collection,
            id: envelope.id.clone(),
            reason,
        };
        let plaintext = Zeroizing::new(sealer.open(&envelope.data).map_err(|source| {
            StoreError::Decryption {
                collection,
                id: envelope.id.clone(),
                source,
            }
        })?);
        let text = std::str::from_utf8(&plaintext).map_err(|_| corrupt("payload is not UTF-8".into()))?;
        let mut record = Record::from_json(text).map_err(|e| corrupt(e.to_string()))?;
        if record.id() != Some(envelope.id.as_str()) {
            return Err(corrupt("payload id does not match envelope id".into()));
        }
        restore_time(&mut record, "created", &envelope.created);
        restore_time(&mut record, "modified", &envelope.modified);

        self.cache.insert(collection, &envelope.id, digest, record.clone());
        Ok(record)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("store", &self.store)
            .field("cached", &self.cache.len())
            .finish()
    }
}

/// Put the envelope's time onto `field`, keeping the record's own value when
/// it already denotes the same instant.
fn restore_time(record: &mut Record, field: &str, at: &Timestamp) {
    if record.get(field).and_then(parse_timestamp).as_ref() != Some(at) {
        record.set(field, format_timestamp_exact(at));
    }
}

fn report(collection: Collection, op: &str, result: StoreResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            error!(%collection, op, error = %e, "write failed");
            false
        }
    }
}
