use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use somnia_store::{LockRegistry, Vault};
use somnia_types::{format_timestamp, now, Timestamp};

use crate::confirm::{ConfirmOverwrite, OverwriteKind};
use crate::conflict::ConflictDetector;
use crate::error::{SyncError, SyncResult};
use crate::marker::SyncMarker;
use crate::remote::{newest_backup, RemoteFile, RemoteProvider, BACKUP_FILE_NAME};
use crate::snapshot::Snapshot;

/// What the engine is doing right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncStatus {
    #[default]
    Idle,
    /// Checking both replicas for changes since the last sync.
    Comparing,
    /// Uploading or restoring a snapshot.
    Operating,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Comparing => f.write_str("comparing"),
            Self::Operating => f.write_str("operating"),
        }
    }
}

/// How a sync run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Uploaded { export_date: Timestamp, records: usize },
    Downloaded { export_date: Timestamp, records: usize },
    /// The user refused to overwrite the named replica; nothing changed.
    Declined(OverwriteKind),
    /// The remote holds no backup.
    NothingToDownload,
}

/// Marks the engine busy for one run and returns it to idle on drop.
struct StatusGuard<'a> {
    status: &'a watch::Sender<SyncStatus>,
}

impl<'a> StatusGuard<'a> {
    fn begin(status: &'a watch::Sender<SyncStatus>) -> SyncResult<Self> {
        let mut busy = SyncStatus::Idle;
        let started = status.send_if_modified(|current| {
            if *current == SyncStatus::Idle {
                *current = SyncStatus::Comparing;
                true
            } else {
                busy = *current;
                false
            }
        });
        if started {
            Ok(Self { status })
        } else {
            Err(SyncError::InProgress(busy))
        }
    }

    fn operating(&self) {
        self.status.send_replace(SyncStatus::Operating);
    }
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        self.status.send_replace(SyncStatus::Idle);
    }
}

/// Uploads and restores journal snapshots.
///
/// One run at a time: starting a run while another is in progress fails
/// with [`SyncError::InProgress`]. Destructive steps ask a
/// [`ConfirmOverwrite`] first whenever the [`ConflictDetector`] reports
/// changes on the side about to be overwritten.
pub struct SyncEngine {
    vault: Arc<Vault>,
    locks: Arc<LockRegistry>,
    marker: SyncMarker,
    remote: Arc<dyn RemoteProvider>,
    confirm: Arc<dyn ConfirmOverwrite>,
    detector: ConflictDetector,
    status: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    pub fn new(
        vault: Arc<Vault>,
        locks: Arc<LockRegistry>,
        marker: SyncMarker,
        remote: Arc<dyn RemoteProvider>,
        confirm: Arc<dyn ConfirmOverwrite>,
    ) -> Self {
        let detector = ConflictDetector::new(vault.store().clone(), Arc::clone(&remote));
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            vault,
            locks,
            marker,
            remote,
            confirm,
            detector,
            status,
        }
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    pub fn marker(&self) -> &SyncMarker {
        &self.marker
    }

    /// Publish the local journal as the remote backup.
    ///
    /// The marker moves to the snapshot's export date only after the
    /// uploaded document reads back with that date.
    pub async fn upload(&self) -> SyncResult<SyncOutcome> {
        let guard = StatusGuard::begin(&self.status)?;
        let last_sync = self.marker.last_sync()?;
        if self.detector.has_remote_changes_since(last_sync).await
            && !self.confirm.confirm_overwrite(OverwriteKind::Remote).await
        {
            info!("upload declined");
            return Ok(SyncOutcome::Declined(OverwriteKind::Remote));
        }

        guard.operating();
        let snapshot = Snapshot::capture(&self.vault, now())?;
        let contents = snapshot.to_json()?;
        let file = self
            .remote
            .upload_remote_file(BACKUP_FILE_NAME, &contents)
            .await?;
        self.verify_upload(&file, snapshot.export_date).await?;
        self.marker.advance(snapshot.export_date)?;

        let records = snapshot.data.len();
        info!(
            records,
            export_date = %format_timestamp(&snapshot.export_date),
            "upload finished"
        );
        Ok(SyncOutcome::Uploaded {
            export_date: snapshot.export_date,
            records,
        })
    }

    /// Replace the local journal with the newest remote backup.
    ///
    /// A backup that fails to download, parse or validate leaves local data
    /// untouched.
    pub async fn download(&self) -> SyncResult<SyncOutcome> {
        let guard = StatusGuard::begin(&self.status)?;
        let Some(backup) = newest_backup(self.remote.list_remote_files().await?) else {
            debug!("no remote backup");
            return Ok(SyncOutcome::NothingToDownload);
        };
        let last_sync = self.marker.last_sync()?;
        if self.detector.has_local_changes_since(last_sync)
            && !self.confirm.confirm_overwrite(OverwriteKind::Local).await
        {
            info!("download declined");
            return Ok(SyncOutcome::Declined(OverwriteKind::Local));
        }

        guard.operating();
        let text = self.remote.download_remote_file(&backup).await?;
        let snapshot = Snapshot::from_json(&text)?;
        let records = snapshot.restore(&self.vault, &self.locks).await?;
        self.marker.advance(now())?;

        info!(
            records,
            export_date = %format_timestamp(&snapshot.export_date),
            "download finished"
        );
        Ok(SyncOutcome::Downloaded {
            export_date: snapshot.export_date,
            records,
        })
    }

    async fn verify_upload(&self, file: &RemoteFile, expected: Timestamp) -> SyncResult<()> {
        let text = self.remote.download_remote_file(file).await?;
        let uploaded = Snapshot::from_json(&text)
            .map_err(|e| SyncError::VerificationFailed(e.to_string()))?;
        if uploaded.export_date != expected {
            warn!(
                expected = %format_timestamp(&expected),
                found = %format_timestamp(&uploaded.export_date),
                "uploaded backup does not match"
            );
            return Err(SyncError::VerificationFailed(format!(
                "remote exportDate is {}, expected {}",
                format_timestamp(&uploaded.export_date),
                format_timestamp(&expected)
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
