use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use somnia_types::Collection;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::config::StoreConfig;
use crate::kv::{FileKvStore, InMemoryKvStore, KeyValueStore, KvBackend};
use crate::memory::InMemoryBackend;
use crate::migrate::{MigrationReport, Migrator};
use crate::structured::StructuredStore;
use crate::traits::RecordBackend;

/// Durability tier backing a collection, most durable first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    StructuredStore,
    FallbackKv,
    MemoryOnly,
}

impl StorageMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StructuredStore => "structured-store",
            Self::FallbackKv => "fallback-kv",
            Self::MemoryOnly => "memory-only",
        }
    }

    pub const fn is_durable(&self) -> bool {
        !matches!(self, Self::MemoryOnly)
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised once when storage is running below the structured tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DurabilityWarning {
    pub mode: StorageMode,
    /// Collections whose data will not survive a restart.
    pub volatile: Vec<Collection>,
    pub message: String,
}

/// Receives durability warnings, e.g. to show them to the user.
pub trait DurabilityNotifier: Send + Sync {
    fn notify(&self, warning: &DurabilityWarning);
}

/// The backends chosen at startup.
pub struct Backends {
    mode: StorageMode,
    structured: Option<Arc<StructuredStore>>,
    kv: Arc<dyn KeyValueStore>,
    flat: Arc<KvBackend>,
    memory: Arc<InMemoryBackend>,
    warnings: Vec<DurabilityWarning>,
    migration: Option<MigrationReport>,
}

impl Backends {
    /// Overall mode: the tier holding the journal collections.
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Tier backing one collection.
    pub fn mode_for(&self, collection: Collection) -> StorageMode {
        match self.mode {
            StorageMode::FallbackKv if collection.is_blob() => StorageMode::MemoryOnly,
            mode => mode,
        }
    }

    /// Backend serving one collection.
    pub fn backend_for(&self, collection: Collection) -> Arc<dyn RecordBackend> {
        match (&self.structured, self.mode_for(collection)) {
            (Some(structured), StorageMode::StructuredStore) => {
                Arc::clone(structured) as Arc<dyn RecordBackend>
            }
            (_, StorageMode::FallbackKv) => Arc::clone(&self.flat) as Arc<dyn RecordBackend>,
            _ => Arc::clone(&self.memory) as Arc<dyn RecordBackend>,
        }
    }

    /// Flat key-value store for settings.
    pub fn kv(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.kv)
    }

    pub fn structured(&self) -> Option<&Arc<StructuredStore>> {
        self.structured.as_ref()
    }

    pub fn warnings(&self) -> &[DurabilityWarning] {
        &self.warnings
    }

    /// Schema version of the structured store, if there is one.
    pub fn schema_version(&self) -> Option<u32> {
        self.structured.as_ref().map(|s| s.schema_version())
    }

    /// Report of the migration run during selection.
    pub fn migration(&self) -> Option<&MigrationReport> {
        self.migration.as_ref()
    }

    /// Backends with nothing durable, for tests and embedding.
    pub fn in_memory() -> Self {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        Self {
            mode: StorageMode::MemoryOnly,
            structured: None,
            flat: Arc::new(KvBackend::new(Arc::clone(&kv))),
            kv,
            memory: Arc::new(InMemoryBackend::new()),
            warnings: Vec::new(),
            migration: None,
        }
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("mode", &self.mode)
            .field("schema_version", &self.schema_version())
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

/// Picks the most durable storage tier available, once.
///
/// [`BackendSelector::initialize`] probes the structured store, then the
/// flat store, and settles on one of three modes. When the structured store
/// is available the schema migrator runs to completion before the handle is
/// returned, so no caller ever sees unmigrated data. Selection never fails:
/// every problem degrades to a less durable tier plus a warning.
pub struct BackendSelector {
    config: StoreConfig,
    notifier: Option<Arc<dyn DurabilityNotifier>>,
    ready: OnceCell<Arc<Backends>>,
}

impl BackendSelector {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            notifier: None,
            ready: OnceCell::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn DurabilityNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Select backends on first call; later calls return the same handle.
    ///
    /// Probing, log replay and migration do blocking file I/O, so they run
    /// on the blocking pool.
    pub async fn initialize(&self) -> Arc<Backends> {
        self.ready
            .get_or_init(|| async {
                let config = self.config.clone();
                let notifier = self.notifier.clone();
                let backends = tokio::task::spawn_blocking(move || select(&config, notifier.as_deref()))
                    .await
                    .unwrap_or_else(|e| {
                        error!(error = %e, "backend selection aborted");
                        memory_only(self.notifier.as_deref())
                    });
                Arc::new(backends)
            })
            .await
            .clone()
    }

    /// The handle, if initialization has completed.
    pub fn get(&self) -> Option<Arc<Backends>> {
        self.ready.get().cloned()
    }
}

fn select(config: &StoreConfig, notifier: Option<&dyn DurabilityNotifier>) -> Backends {
    let structured = open_structured(config);
    let kv = open_kv(config);

    let mode = match (&structured, kv.is_durable()) {
        (Some(_), _) => StorageMode::StructuredStore,
        (None, true) => StorageMode::FallbackKv,
        (None, false) => StorageMode::MemoryOnly,
    };

    let migration = structured.as_ref().and_then(|store| {
        match Migrator::new(Arc::clone(store), Arc::clone(&kv)).run() {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "schema migration failed");
                None
            }
        }
    });

    info!(%mode, "storage backends selected");
    Backends {
        mode,
        structured,
        flat: Arc::new(KvBackend::new(Arc::clone(&kv))),
        kv,
        memory: Arc::new(InMemoryBackend::new()),
        warnings: announce(mode, notifier),
        migration,
    }
}

/// Last resort when selection itself could not complete.
fn memory_only(notifier: Option<&dyn DurabilityNotifier>) -> Backends {
    Backends {
        warnings: announce(StorageMode::MemoryOnly, notifier),
        ..Backends::in_memory()
    }
}

fn announce(mode: StorageMode, notifier: Option<&dyn DurabilityNotifier>) -> Vec<DurabilityWarning> {
    let warnings = durability_warnings(mode);
    for warning in &warnings {
        warn!(mode = %warning.mode, volatile = ?warning.volatile, "{}", warning.message);
        if let Some(notifier) = notifier {
            notifier.notify(warning);
        }
    }
    warnings
}

fn open_structured(config: &StoreConfig) -> Option<Arc<StructuredStore>> {
    if !config.structured {
        return None;
    }
    let dir = config.data_dir.as_ref()?.join("structured");
    match StructuredStore::open(&dir, config.structured_config()) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "structured store unavailable");
            None
        }
    }
}

fn open_kv(config: &StoreConfig) -> Arc<dyn KeyValueStore> {
    if let Some(data_dir) = &config.data_dir {
        let dir = data_dir.join("kv");
        match FileKvStore::open(&dir, config.fsync) {
            Ok(kv) => return Arc::new(kv),
            Err(e) => warn!(dir = %dir.display(), error = %e, "key-value store unavailable"),
        }
    }
    Arc::new(InMemoryKvStore::new())
}

fn durability_warnings(mode: StorageMode) -> Vec<DurabilityWarning> {
    match mode {
        StorageMode::StructuredStore => Vec::new(),
        StorageMode::FallbackKv => vec![DurabilityWarning {
            mode,
            volatile: Collection::ALL.into_iter().filter(Collection::is_blob).collect(),
            message: "structured store unavailable: journal data is kept in the flat \
                      key-value store and voice notes will not survive a restart"
                .into(),
        }],
        StorageMode::MemoryOnly => vec![DurabilityWarning {
            mode,
            volatile: Collection::ALL.to_vec(),
            message: "no durable storage available: changes will be lost when the \
                      process exits"
                .into(),
        }],
    }
}
