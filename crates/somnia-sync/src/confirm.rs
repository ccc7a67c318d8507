use std::fmt;

use async_trait::async_trait;

/// Which replica a sync is about to overwrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OverwriteKind {
    /// A download would replace local data changed since the last sync.
    Local,
    /// An upload would replace a remote backup newer than the last sync.
    Remote,
}

impl fmt::Display for OverwriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Asks the user whether unsynced changes may be overwritten.
#[async_trait]
pub trait ConfirmOverwrite: Send + Sync {
    async fn confirm_overwrite(&self, kind: OverwriteKind) -> bool;
}

/// Answers every question the same way.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl ConfirmOverwrite for AutoConfirm {
    async fn confirm_overwrite(&self, _kind: OverwriteKind) -> bool {
        self.0
    }
}
