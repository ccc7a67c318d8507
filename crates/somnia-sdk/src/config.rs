use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use somnia_store::StoreConfig;
use somnia_sync::FolderRemote;

use crate::error::{SdkError, SdkResult};

/// Contents of `somnia.toml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub store: StoreConfig,
    pub encryption: EncryptionConfig,
    pub remote: RemoteConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Initial setting for a journal that has never stored one.
    pub enabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Directory used as the sync remote.
    pub folder: Option<PathBuf>,
}

impl JournalConfig {
    /// Everything under `dir`, with default settings otherwise.
    pub fn at(dir: impl AsRef<Path>) -> Self {
        Self {
            store: StoreConfig::at(dir),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> SdkResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> SdkResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(text: &str) -> SdkResult<Self> {
        toml::from_str(text).map_err(|e| SdkError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> SdkResult<String> {
        toml::to_string_pretty(self).map_err(|e| SdkError::Config(e.to_string()))
    }

    /// The configured folder remote, if any.
    pub fn folder_remote(&self) -> Option<FolderRemote> {
        self.remote.folder.as_ref().map(FolderRemote::new)
    }
}
