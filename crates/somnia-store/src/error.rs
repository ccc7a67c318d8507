use somnia_crypto::CryptoError;
use somnia_types::{Collection, TypeError};

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The record failed validation; nothing was written.
    #[error("validation failed: {0}")]
    Validation(#[from] TypeError),

    /// An envelope was read or a write needed encrypting, but no password is
    /// available in this session.
    #[error("encryption password required")]
    PasswordRequired,

    /// An envelope could not be opened: wrong password or corrupt ciphertext.
    #[error("cannot decrypt {collection}/{id}: {source}")]
    Decryption {
        collection: Collection,
        id: String,
        #[source]
        source: CryptoError,
    },

    /// Sealing a record failed.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// A stored value is unreadable even though it decoded.
    #[error("corrupt value {collection}/{id}: {reason}")]
    Corrupt {
        collection: Collection,
        id: String,
        reason: String,
    },

    /// The collection does not exist in the structured store yet.
    #[error("collection not created: {0}")]
    MissingCollection(Collection),

    /// A key-value key contains characters the backend cannot store.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Migrated data could not be read back.
    #[error("verification failed for {collection}: {reason}")]
    VerificationFailed {
        collection: Collection,
        reason: String,
    },

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage backend is unusable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
