//! Storage core for Somnia.
//!
//! This crate persists journal collections across three backend tiers of
//! decreasing durability and hides encryption from everything above it.
//!
//! # Layers
//!
//! - [`BackendSelector`] -- picks the most durable tier once at startup and
//!   runs the [`Migrator`] before anyone reads
//! - [`RecordStore`] -- collection-scoped CRUD over [`StoredValue`]s
//! - [`Vault`] -- encrypts designated collections on write, decrypts on read
//! - [`LockRegistry`] -- named FIFO locks serializing mutations
//!
//! # Storage Backends
//!
//! All backends implement the [`RecordBackend`] trait:
//!
//! - [`StructuredStore`] -- CRC-framed append log per collection
//! - [`KvBackend`] -- one JSON array per collection in a [`KeyValueStore`]
//! - [`InMemoryBackend`] -- process-local, for the memory-only tier and tests
//!
//! # Design Rules
//!
//! 1. Writes are upserts that replace a record whole, in place.
//! 2. Invalid records are rejected before anything is written.
//! 3. `replace` swaps a collection atomically on every tier.
//! 4. An unavailable tier degrades to the next one with a warning, never an error.
//! 5. Legacy flat data is deleted only after its copy reads back.
//!
//! [`StoredValue`]: somnia_types::StoredValue

pub mod cache;
pub mod config;
pub mod error;
pub mod kv;
pub mod locks;
pub mod memory;
pub mod migrate;
pub mod password;
pub mod record_store;
pub mod selector;
pub mod structured;
pub mod traits;
pub mod vault;

pub use cache::DecryptedCache;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use kv::{FileKvStore, InMemoryKvStore, KeyValueStore, KvBackend};
pub use locks::{names as lock_names, LockRegistry};
pub use memory::InMemoryBackend;
pub use migrate::{MigrationReport, Migrator, CURRENT_SCHEMA_VERSION};
pub use password::{PasswordProvider, SessionPassword};
pub use record_store::RecordStore;
pub use selector::{BackendSelector, Backends, DurabilityNotifier, DurabilityWarning, StorageMode};
pub use structured::{StoreMeta, StructuredConfig, StructuredStore};
pub use traits::RecordBackend;
pub use vault::Vault;
