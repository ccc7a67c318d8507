use thiserror::Error;

use crate::engine::SyncStatus;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync is already running (status: {0})")]
    InProgress(SyncStatus),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("upload verification failed: {0}")]
    VerificationFailed(String),

    #[error("invalid snapshot: {0}")]
    Snapshot(String),

    #[error("store error: {0}")]
    Store(#[from] somnia_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
