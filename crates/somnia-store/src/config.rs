use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use somnia_crypto::KdfParams;

use crate::structured::StructuredConfig;

/// Storage configuration (the `[store]` table of `somnia.toml`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for durable data. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Try the structured store before falling back to the flat store.
    pub structured: bool,
    /// `fsync` after every write.
    pub fsync: bool,
    /// Operations appended to a collection log before it is compacted.
    pub compact_after: usize,
    /// Envelope key derivation costs.
    pub kdf: KdfParams,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            structured: true,
            fsync: false,
            compact_after: StructuredConfig::default().compact_after,
            kdf: KdfParams::default(),
        }
    }
}

impl StoreConfig {
    /// Durable storage rooted at `dir`.
    pub fn at(dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: Some(dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// No durable storage at all.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub(crate) fn structured_config(&self) -> StructuredConfig {
        StructuredConfig {
            fsync: self.fsync,
            compact_after: self.compact_after,
        }
    }
}
