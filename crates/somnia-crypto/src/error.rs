/// Errors from sealing and opening envelopes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The blob is too short, has the wrong magic, or carries KDF parameters
    /// outside the accepted bounds.
    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    /// Key derivation failed (invalid parameters).
    #[error("key derivation failed: {0}")]
    Kdf(String),

    /// Authentication failed: wrong password or tampered ciphertext.
    #[error("decryption failed: wrong password or corrupted data")]
    Decryption,

    /// The AEAD refused to encrypt.
    #[error("encryption failed")]
    Encryption,
}

/// Result alias for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
