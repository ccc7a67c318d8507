use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use somnia_types::{now, Timestamp};

use crate::error::{SyncError, SyncResult};

/// Name of the backup document on the remote.
pub const BACKUP_FILE_NAME: &str = "dream_journal_backup.json";

/// A file as listed by a remote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub modified: Option<Timestamp>,
}

/// Storage holding snapshot documents, such as a cloud drive folder.
///
/// Authentication and transport are the provider's concern; every failure
/// surfaces as [`SyncError::Remote`].
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    async fn list_remote_files(&self) -> SyncResult<Vec<RemoteFile>>;

    async fn download_remote_file(&self, file: &RemoteFile) -> SyncResult<String>;

    /// Create or overwrite the file called `name`.
    async fn upload_remote_file(&self, name: &str, contents: &str) -> SyncResult<RemoteFile>;
}

/// The most recently modified backup document, if any.
pub fn newest_backup(files: Vec<RemoteFile>) -> Option<RemoteFile> {
    files
        .into_iter()
        .filter(|f| f.name == BACKUP_FILE_NAME)
        .max_by_key(|f| f.modified)
}

// ---------------------------------------------------------------------------
// In-memory remote
// ---------------------------------------------------------------------------

/// Remote held in process memory. Can be switched offline to simulate
/// network failures.
#[derive(Default)]
pub struct InMemoryRemote {
    files: Mutex<BTreeMap<String, (String, Timestamp)>>,
    offline: AtomicBool,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Place a file directly, as another device would.
    pub fn put_file(&self, name: &str, contents: &str, modified: Timestamp) {
        self.files
            .lock()
            .expect("lock poisoned")
            .insert(name.to_string(), (contents.to_string(), modified));
    }

    pub fn file(&self, name: &str) -> Option<String> {
        self.files
            .lock()
            .expect("lock poisoned")
            .get(name)
            .map(|(contents, _)| contents.clone())
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SyncError::Remote("remote is offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteProvider for InMemoryRemote {
    async fn list_remote_files(&self) -> SyncResult<Vec<RemoteFile>> {
        self.check_online()?;
        let files = self.files.lock().expect("lock poisoned");
        Ok(files
            .iter()
            .map(|(name, (_, modified))| RemoteFile {
                id: name.clone(),
                name: name.clone(),
                modified: Some(*modified),
            })
            .collect())
    }

    async fn download_remote_file(&self, file: &RemoteFile) -> SyncResult<String> {
        self.check_online()?;
        self.file(&file.id)
            .ok_or_else(|| SyncError::Remote(format!("no such file: {}", file.name)))
    }

    async fn upload_remote_file(&self, name: &str, contents: &str) -> SyncResult<RemoteFile> {
        self.check_online()?;
        let modified = now();
        self.put_file(name, contents, modified);
        Ok(RemoteFile {
            id: name.to_string(),
            name: name.to_string(),
            modified: Some(modified),
        })
    }
}

impl std::fmt::Debug for InMemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRemote")
            .field("offline", &self.offline.load(Ordering::SeqCst))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Folder remote
// ---------------------------------------------------------------------------

/// Remote backed by a directory, for example a locally mounted cloud drive.
/// File ids are file names; uploads are written aside and renamed into place.
#[derive(Clone, Debug)]
pub struct FolderRemote {
    dir: PathBuf,
}

impl FolderRemote {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn remote_io(context: &str, e: std::io::Error) -> SyncError {
    SyncError::Remote(format!("{context}: {e}"))
}

#[async_trait]
impl RemoteProvider for FolderRemote {
    async fn list_remote_files(&self) -> SyncResult<Vec<RemoteFile>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(remote_io("list", e)),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| remote_io("list", e))? {
            let meta = entry.metadata().await.map_err(|e| remote_io("stat", e))?;
            if !meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let modified = meta.modified().ok().map(DateTime::<Utc>::from);
            files.push(RemoteFile {
                id: name.clone(),
                name,
                modified,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn download_remote_file(&self, file: &RemoteFile) -> SyncResult<String> {
        tokio::fs::read_to_string(self.dir.join(&file.id))
            .await
            .map_err(|e| remote_io("download", e))
    }

    async fn upload_remote_file(&self, name: &str, contents: &str) -> SyncResult<RemoteFile> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(SyncError::Remote(format!("invalid file name: {name:?}")));
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| remote_io("upload", e))?;
        let target = self.dir.join(name);
        let staging = self.dir.join(format!(".{name}.partial"));
        tokio::fs::write(&staging, contents)
            .await
            .map_err(|e| remote_io("upload", e))?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|e| remote_io("upload", e))?;
        debug!(file = name, bytes = contents.len(), "uploaded to folder");
        Ok(RemoteFile {
            id: name.to_string(),
            name: name.to_string(),
            modified: Some(now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn memory_remote_round_trips_files() {
        let remote = InMemoryRemote::new();
        let file = remote.upload_remote_file(BACKUP_FILE_NAME, "{}").await.unwrap();
        assert_eq!(remote.download_remote_file(&file).await.unwrap(), "{}");
        assert_eq!(remote.list_remote_files().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn offline_remote_fails_every_call() {
        let remote = InMemoryRemote::new();
        remote.set_offline(true);
        assert!(matches!(remote.list_remote_files().await, Err(SyncError::Remote(_))));
        assert!(remote.upload_remote_file(BACKUP_FILE_NAME, "{}").await.is_err());
        remote.set_offline(false);
        assert!(remote.list_remote_files().await.unwrap().is_empty());
    }

    #[test]
    fn newest_backup_ignores_other_files() {
        let t = now();
        let file = |name: &str, age: i64| RemoteFile {
            id: format!("{name}-{age}"),
            name: name.to_string(),
            modified: Some(t - Duration::minutes(age)),
        };
        let picked = newest_backup(vec![
            file(BACKUP_FILE_NAME, 10),
            file("notes.txt", 0),
            file(BACKUP_FILE_NAME, 2),
        ])
        .unwrap();
        assert_eq!(picked.id, format!("{BACKUP_FILE_NAME}-2"));
        assert!(newest_backup(vec![file("notes.txt", 0)]).is_none());
    }

    #[tokio::test]
    async fn folder_remote_lists_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FolderRemote::new(dir.path().join("drive"));
        assert!(remote.list_remote_files().await.unwrap().is_empty());

        let file = remote.upload_remote_file(BACKUP_FILE_NAME, "payload").await.unwrap();
        let listed = remote.list_remote_files().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, BACKUP_FILE_NAME);
        assert!(listed[0].modified.is_some());
        assert_eq!(remote.download_remote_file(&file).await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn folder_remote_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let remote = FolderRemote::new(dir.path());
        assert!(remote.upload_remote_file("../escape.json", "x").await.is_err());
        assert!(remote.upload_remote_file(".hidden", "x").await.is_err());
    }
}
