use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, info, warn};

use somnia_store::{
    lock_names, BackendSelector, Backends, DurabilityNotifier, DurabilityWarning, LockRegistry,
    PasswordProvider, RecordStore, SessionPassword, StorageMode, StoreError, Vault,
};
use somnia_sync::{ConfirmOverwrite, RemoteProvider, Snapshot, SyncEngine, SyncMarker};
use somnia_types::{format_timestamp, now, Collection, Record, StoredValue};

use crate::config::JournalConfig;
use crate::error::{SdkError, SdkResult};

/// Flat-store key remembering whether encryption is on.
pub const ENCRYPTION_ENABLED_KEY: &str = "encryptionEnabled";

/// An open dream journal.
///
/// Reads go straight to the vault. Every write runs under the named lock of
/// its collection, and every delete under the shared delete lock, so
/// concurrent callers in one process are applied in arrival order.
pub struct Journal {
    config: JournalConfig,
    backends: Arc<Backends>,
    vault: Arc<Vault>,
    locks: Arc<LockRegistry>,
    password: Arc<SessionPassword>,
    marker: SyncMarker,
}

impl Journal {
    pub async fn open(config: JournalConfig) -> SdkResult<Self> {
        Self::open_with_notifier(config, None).await
    }

    /// Open the journal, reporting degraded storage to `notifier`.
    ///
    /// Returns once the backend is selected and any legacy data migrated.
    pub async fn open_with_notifier(
        config: JournalConfig,
        notifier: Option<Arc<dyn DurabilityNotifier>>,
    ) -> SdkResult<Self> {
        let mut selector = BackendSelector::new(config.store.clone());
        if let Some(notifier) = notifier {
            selector = selector.with_notifier(notifier);
        }
        let backends = selector.initialize().await;

        let enabled = match backends.kv().get_item(ENCRYPTION_ENABLED_KEY)? {
            Some(value) => value == "true",
            None => config.encryption.enabled,
        };
        let password = Arc::new(SessionPassword::new(enabled));
        let store = RecordStore::new(Arc::clone(&backends));
        let vault = Arc::new(Vault::new(
            store,
            Arc::clone(&password) as Arc<dyn PasswordProvider>,
            config.store.kdf,
        ));
        let marker = SyncMarker::new(backends.kv());

        info!(mode = %backends.mode(), encrypted = enabled, "journal opened");
        Ok(Self {
            config,
            backends,
            vault,
            locks: Arc::new(LockRegistry::new()),
            password,
            marker,
        })
    }

    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    pub fn mode(&self) -> StorageMode {
        self.backends.mode()
    }

    pub fn warnings(&self) -> &[DurabilityWarning] {
        self.backends.warnings()
    }

    pub fn backends(&self) -> &Arc<Backends> {
        &self.backends
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    // ---- Records ----

    /// Upsert one record under the collection's save lock.
    pub async fn save(&self, collection: Collection, record: Record) -> SdkResult<()> {
        self.locks
            .with_lock(lock_names::save(collection), || async {
                self.vault.try_put(collection, record)
            })
            .await?;
        Ok(())
    }

    /// Replace the whole collection under its save lock.
    pub async fn save_all(&self, collection: Collection, records: Vec<Record>) -> SdkResult<()> {
        self.locks
            .with_lock(lock_names::save(collection), || async {
                self.vault.try_replace_all(collection, records)
            })
            .await?;
        Ok(())
    }

    pub fn load(&self, collection: Collection, id: &str) -> SdkResult<Option<Record>> {
        Ok(self.vault.get(collection, id)?)
    }

    pub fn load_all(&self, collection: Collection) -> SdkResult<Vec<Record>> {
        Ok(self.vault.get_all(collection)?)
    }

    /// Delete one record. Returns `true` if it existed.
    ///
    /// Holds `deleteOperations`, then the collection's save lock, so a
    /// delete cannot land inside a whole-collection rewrite and be undone.
    pub async fn delete(&self, collection: Collection, id: &str) -> SdkResult<bool> {
        let existed = self
            .locks
            .with_lock(lock_names::DELETE_OPERATIONS, || async {
                self.locks
                    .with_lock(lock_names::save(collection), || async {
                        self.vault.try_delete(collection, id)
                    })
                    .await
            })
            .await?;
        Ok(existed)
    }

    // ---- Typed helpers ----

    pub async fn save_dream(&self, dream: Record) -> SdkResult<()> {
        self.save(Collection::Dreams, dream).await
    }

    pub fn dreams(&self) -> SdkResult<Vec<Record>> {
        self.load_all(Collection::Dreams)
    }

    pub async fn save_goal(&self, goal: Record) -> SdkResult<()> {
        self.save(Collection::Goals, goal).await
    }

    pub fn goals(&self) -> SdkResult<Vec<Record>> {
        self.load_all(Collection::Goals)
    }

    /// Store a voice memo. The audio is kept base64-encoded in `audio`.
    pub async fn save_voice_note(&self, id: &str, audio: &[u8], mut fields: Record) -> SdkResult<()> {
        fields.set("id", id);
        fields.set("audio", STANDARD.encode(audio));
        if fields.get("created").is_none() {
            fields.set("created", format_timestamp(&now()));
        }
        self.save(Collection::VoiceNotes, fields).await
    }

    pub fn voice_notes(&self) -> SdkResult<Vec<Record>> {
        self.load_all(Collection::VoiceNotes)
    }

    /// Decoded audio of one voice memo.
    pub fn voice_note_audio(&self, id: &str) -> SdkResult<Option<Vec<u8>>> {
        let Some(note) = self.load(Collection::VoiceNotes, id)? else {
            return Ok(None);
        };
        let encoded = note
            .get("audio")
            .and_then(Value::as_str)
            .ok_or_else(|| SdkError::InvalidOperation(format!("voice note {id} has no audio")))?;
        STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| SdkError::InvalidOperation(format!("voice note {id}: {e}")))
    }

    /// Suggestions of one autocomplete list (e.g. `tags`, `people`).
    pub fn autocomplete(&self, list: &str) -> SdkResult<Vec<String>> {
        let items = self
            .load(Collection::Autocomplete, list)?
            .and_then(|record| record.get("items").cloned());
        Ok(match items {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        })
    }

    pub async fn set_autocomplete(&self, list: &str, items: Vec<String>) -> SdkResult<()> {
        let record = Record::new(list)
            .with("items", items)
            .with("modified", format_timestamp(&now()));
        self.save(Collection::Autocomplete, record).await
    }

    // ---- Encryption ----

    pub fn encryption_enabled(&self) -> bool {
        self.password.encryption_enabled()
    }

    pub fn is_unlocked(&self) -> bool {
        self.password.has_password()
    }

    /// Turn encryption on and seal existing records. Returns the number of
    /// records converted.
    pub async fn enable_encryption(&self, password: &str) -> SdkResult<usize> {
        if password.is_empty() {
            return Err(SdkError::InvalidOperation("empty password".into()));
        }
        self.password.set_password(password);
        self.password.set_enabled(true);
        match self.rewrite_encryptable().await {
            Ok(converted) => {
                self.persist_enabled(true)?;
                info!(converted, "encryption enabled");
                Ok(converted)
            }
            Err(e) => {
                self.password.set_enabled(false);
                Err(e)
            }
        }
    }

    /// Turn encryption off and open existing envelopes. Needs the password
    /// if anything is sealed. Returns the number of records converted.
    pub async fn disable_encryption(&self) -> SdkResult<usize> {
        let was_enabled = self.password.encryption_enabled();
        self.password.set_enabled(false);
        match self.rewrite_encryptable().await {
            Ok(converted) => {
                self.persist_enabled(false)?;
                info!(converted, "encryption disabled");
                Ok(converted)
            }
            Err(e) => {
                self.password.set_enabled(was_enabled);
                Err(e)
            }
        }
    }

    /// Enter the session password.
    ///
    /// Checked against one stored envelope when there is any; a password that
    /// does not open it is refused and not kept.
    pub fn unlock(&self, password: &str) -> SdkResult<()> {
        self.password.set_password(password);
        let Some((collection, id)) = self.first_envelope()? else {
            return Ok(());
        };
        match self.vault.get(collection, &id) {
            Ok(_) => {
                debug!("session unlocked");
                Ok(())
            }
            Err(StoreError::Decryption { .. }) => {
                self.password.clear_password();
                self.vault.invalidate_cache();
                warn!("unlock refused");
                Err(SdkError::WrongPassword)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forget the session password and every decrypted record.
    pub fn lock(&self) {
        self.password.clear_password();
        self.vault.invalidate_cache();
        debug!("session locked");
    }

    async fn rewrite_encryptable(&self) -> SdkResult<usize> {
        let mut converted = 0;
        for collection in Collection::ALL.into_iter().filter(Collection::is_encryptable) {
            converted += self
                .locks
                .with_lock(lock_names::save(collection), || async {
                    self.vault.rewrite_collection(collection)
                })
                .await?;
        }
        Ok(converted)
    }

    fn persist_enabled(&self, enabled: bool) -> SdkResult<()> {
        self.backends
            .kv()
            .set_item(ENCRYPTION_ENABLED_KEY, if enabled { "true" } else { "false" })?;
        Ok(())
    }

    fn first_envelope(&self) -> SdkResult<Option<(Collection, String)>> {
        for collection in Collection::ALL.into_iter().filter(Collection::is_encryptable) {
            let found = self
                .vault
                .store()
                .get_all(collection)?
                .into_iter()
                .find_map(|value| match value {
                    StoredValue::Encrypted(envelope) => Some(envelope.id),
                    StoredValue::Plain(_) => None,
                });
            if let Some(id) = found {
                return Ok(Some((collection, id)));
            }
        }
        Ok(None)
    }

    // ---- Snapshots and sync ----

    /// Plaintext snapshot of the journal, stamped now.
    pub fn export_snapshot(&self) -> SdkResult<Snapshot> {
        Ok(Snapshot::capture(&self.vault, now())?)
    }

    /// Replace dreams, goals and autocomplete with the snapshot's contents.
    /// Returns the number of records written.
    pub async fn import_snapshot(&self, snapshot: &Snapshot) -> SdkResult<usize> {
        let written = snapshot.restore(&self.vault, &self.locks).await?;
        info!(written, "snapshot imported");
        Ok(written)
    }

    pub fn sync_engine(
        &self,
        remote: Arc<dyn RemoteProvider>,
        confirm: Arc<dyn ConfirmOverwrite>,
    ) -> SyncEngine {
        SyncEngine::new(
            Arc::clone(&self.vault),
            Arc::clone(&self.locks),
            self.marker.clone(),
            remote,
            confirm,
        )
    }

    pub fn sync_marker(&self) -> &SyncMarker {
        &self.marker
    }

    /// Forget the remote: clears the sync marker. Returns `true` if one was
    /// set.
    pub fn disconnect(&self) -> SdkResult<bool> {
        let cleared = self.marker.clear()?;
        info!(cleared, "disconnected from remote");
        Ok(cleared)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("mode", &self.mode())
            .field("encrypted", &self.encryption_enabled())
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}
