//! Cryptographic primitives for Somnia.
//!
//! Provides password-based authenticated encryption for record envelopes
//! (Argon2id key derivation, XChaCha20-Poly1305 sealing) and domain-separated
//! BLAKE3 digests used for password fingerprints and ciphertext identity.
//!
//! All crypto operations wrap established libraries.

pub mod digest;
pub mod error;
pub mod sealer;

pub use digest::{ciphertext_digest, PasswordFingerprint};
pub use error::{CryptoError, CryptoResult};
pub use sealer::{KdfParams, Sealer, MAGIC, NONCE_LEN, SALT_LEN};
