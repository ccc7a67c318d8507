use std::sync::Arc;

use tracing::{debug, warn};

use somnia_store::RecordStore;
use somnia_types::{Collection, Timestamp};

use crate::remote::{newest_backup, RemoteProvider};
use crate::snapshot::Snapshot;

/// Collections whose local edits count as changes worth protecting.
const TRACKED: [Collection; 2] = [Collection::Dreams, Collection::Goals];

/// Outcome of comparing both replicas against the sync marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConflictReport {
    pub local_changes: bool,
    pub remote_changes: bool,
}

impl ConflictReport {
    /// Both sides changed since the last sync.
    pub fn is_conflict(&self) -> bool {
        self.local_changes && self.remote_changes
    }
}

/// Decides whether a sync would overwrite unsynced work.
///
/// Advisory only: every question is answered with a `bool`, and anything
/// that cannot be determined is reported as a change.
pub struct ConflictDetector {
    store: RecordStore,
    remote: Arc<dyn RemoteProvider>,
}

impl ConflictDetector {
    pub fn new(store: RecordStore, remote: Arc<dyn RemoteProvider>) -> Self {
        Self { store, remote }
    }

    /// Whether any dream or goal changed after `last_sync`.
    ///
    /// Reads stored values without decrypting; envelopes carry their own
    /// `modified`. A record with no usable time counts as changed.
    pub fn has_local_changes_since(&self, last_sync: Option<Timestamp>) -> bool {
        let Some(last_sync) = last_sync else {
            return true;
        };
        for collection in TRACKED {
            let values = match self.store.get_all(collection) {
                Ok(values) => values,
                Err(e) => {
                    warn!(%collection, error = %e, "cannot load local records, assuming changes");
                    return true;
                }
            };
            for value in &values {
                match value.last_changed() {
                    Some(changed) if changed <= last_sync => {}
                    _ => {
                        debug!(%collection, id = value.id().unwrap_or_default(), "local change");
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Whether the newest remote backup was exported after `last_sync`.
    ///
    /// No backup on the remote means no changes. Failing to list, download
    /// or parse it means changes.
    pub async fn has_remote_changes_since(&self, last_sync: Option<Timestamp>) -> bool {
        let files = match self.remote.list_remote_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "cannot list remote, assuming changes");
                return true;
            }
        };
        let Some(backup) = newest_backup(files) else {
            return false;
        };
        let Some(last_sync) = last_sync else {
            return true;
        };
        let text = match self.remote.download_remote_file(&backup).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "cannot download remote backup, assuming changes");
                return true;
            }
        };
        match Snapshot::from_json(&text) {
            Ok(snapshot) => snapshot.export_date > last_sync,
            Err(e) => {
                warn!(error = %e, "cannot parse remote backup, assuming changes");
                true
            }
        }
    }

    pub async fn assess(&self, last_sync: Option<Timestamp>) -> ConflictReport {
        let report = ConflictReport {
            local_changes: self.has_local_changes_since(last_sync),
            remote_changes: self.has_remote_changes_since(last_sync).await,
        };
        debug!(
            local = report.local_changes,
            remote = report.remote_changes,
            "conflict assessment"
        );
        report
    }
}

impl std::fmt::Debug for ConflictDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictDetector").finish_non_exhaustive()
    }
}
