//! Snapshot synchronization for Somnia.
//!
//! A sync moves the whole journal at once: [`SyncEngine::upload`] publishes a
//! plaintext [`Snapshot`] to a [`RemoteProvider`], and
//! [`SyncEngine::download`] replaces local collections with the newest one.
//! Before overwriting either side the [`ConflictDetector`] checks for changes
//! since the [`SyncMarker`], and the user is asked through
//! [`ConfirmOverwrite`].

pub mod confirm;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod marker;
pub mod remote;
pub mod snapshot;

pub use confirm::{AutoConfirm, ConfirmOverwrite, OverwriteKind};
pub use conflict::{ConflictDetector, ConflictReport};
pub use engine::{SyncEngine, SyncOutcome, SyncStatus};
pub use error::{SyncError, SyncResult};
pub use marker::{SyncMarker, LAST_SYNC_KEY};
pub use remote::{newest_backup, FolderRemote, InMemoryRemote, RemoteFile, RemoteProvider, BACKUP_FILE_NAME};
pub use snapshot::{Snapshot, SnapshotData, SNAPSHOT_VERSION};
