//! High-level SDK for Somnia.
//!
//! [`Journal`] is the entry point for applications: it selects storage,
//! wires the vault and lock registry together, and hands out sync engines.

pub mod config;
pub mod error;
pub mod journal;

pub use config::{EncryptionConfig, JournalConfig, RemoteConfig};
pub use error::{SdkError, SdkResult};
pub use journal::{Journal, ENCRYPTION_ENABLED_KEY};

// Re-export key types
pub use somnia_store::{DurabilityNotifier, DurabilityWarning, StorageMode};
pub use somnia_sync::{
    AutoConfirm, ConfirmOverwrite, FolderRemote, InMemoryRemote, OverwriteKind, RemoteProvider,
    Snapshot, SyncEngine, SyncOutcome, SyncStatus,
};
pub use somnia_types::{Collection, Record};
