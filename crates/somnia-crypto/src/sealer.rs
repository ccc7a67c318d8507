use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::digest::PasswordFingerprint;
use crate::error::{CryptoError, CryptoResult};

/// Leading bytes of every sealed payload.
pub const MAGIC: &[u8; 4] = b"SJE1";
/// Argon2id salt length.
pub const SALT_LEN: usize = 16;
/// XChaCha20-Poly1305 nonce length.
pub const NONCE_LEN: usize = 24;

const MAGIC_LEN: usize = 4;
const PARAMS_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC_LEN + PARAMS_LEN + SALT_LEN + NONCE_LEN;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;

// Upper bounds accepted when reading parameters back from a header.
const MAX_MEMORY_KIB: u32 = 1024 * 1024;
const MAX_ITERATIONS: u32 = 64;
const MAX_PARALLELISM: u32 = 16;

/// Argon2id cost parameters.
///
/// Written into every sealed payload so the key can be re-derived from the
/// password alone, even after the configured costs change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub const fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }

    fn check_bounds(&self) -> CryptoResult<()> {
        if self.memory_kib > MAX_MEMORY_KIB
            || self.iterations == 0
            || self.iterations > MAX_ITERATIONS
            || self.parallelism == 0
            || self.parallelism > MAX_PARALLELISM
        {
            return Err(CryptoError::Malformed(format!(
                "kdf parameters out of range: m={} t={} p={}",
                self.memory_kib, self.iterations, self.parallelism
            )));
        }
        Ok(())
    }

    fn derive(&self, password: &str, salt: &[u8]) -> CryptoResult<Zeroizing<[u8; KEY_LEN]>> {
        self.check_bounds()?;
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(password.as_bytes(), salt, key.as_mut())
            .map_err(|e| CryptoError::Kdf(e.to_string()))?;
        Ok(key)
    }
}

/// Parsed view over a sealed payload.
///
/// Layout:
/// ```text
/// [4 bytes: magic "SJE1"]
/// [4 bytes: memory_kib (LE u32)] [4 bytes: iterations (LE u32)] [4 bytes: parallelism (LE u32)]
/// [16 bytes: salt]
/// [24 bytes: nonce]
/// [N bytes: ciphertext + 16-byte Poly1305 tag]
/// ```
struct SealedPayload<'a> {
    params: KdfParams,
    salt: [u8; SALT_LEN],
    nonce: &'a [u8],
    ciphertext: &'a [u8],
}

impl<'a> SealedPayload<'a> {
    fn parse(blob: &'a [u8]) -> CryptoResult<Self> {
        if blob.len() < HEADER_LEN + TAG_LEN {
            return Err(CryptoError::Malformed(format!(
                "payload too short: {} bytes",
                blob.len()
            )));
        }
        if &blob[..MAGIC_LEN] != MAGIC {
            return Err(CryptoError::Malformed("bad magic".into()));
        }
        let word = |at: usize| u32::from_le_bytes([blob[at], blob[at + 1], blob[at + 2], blob[at + 3]]);
        let params = KdfParams::new(word(MAGIC_LEN), word(MAGIC_LEN + 4), word(MAGIC_LEN + 8));
        params.check_bounds()?;

        let salt_start = MAGIC_LEN + PARAMS_LEN;
        let nonce_start = salt_start + SALT_LEN;
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&blob[salt_start..nonce_start]);

        Ok(Self {
            params,
            salt,
            nonce: &blob[nonce_start..HEADER_LEN],
            ciphertext: &blob[HEADER_LEN..],
        })
    }
}

/// Seals and opens record payloads under one password.
///
/// A sealer draws a random salt once and reuses it for everything it seals,
/// so the slow key derivation runs once per session rather than once per
/// record. Every seal still uses a fresh random nonce. Keys derived for other
/// salts (payloads sealed in earlier sessions) are memoized as they are met.
pub struct Sealer {
    password: Zeroizing<String>,
    params: KdfParams,
    session_salt: [u8; SALT_LEN],
    keys: Mutex<HashMap<([u8; SALT_LEN], KdfParams), Zeroizing<[u8; KEY_LEN]>>>,
}

impl Sealer {
    /// Create a sealer with a fresh random session salt.
    pub fn new(password: &str, params: KdfParams) -> Self {
        let mut session_salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut session_salt);
        Self {
            password: Zeroizing::new(password.to_owned()),
            params,
            session_salt,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Fingerprint of the password this sealer was built with.
    pub fn fingerprint(&self) -> PasswordFingerprint {
        PasswordFingerprint::of(&self.password)
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Encrypt `plaintext` into a self-describing payload.
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let key = self.key_for(self.session_salt, self.params)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encryption)?;

        let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&self.params.memory_kib.to_le_bytes());
        blob.extend_from_slice(&self.params.iterations.to_le_bytes());
        blob.extend_from_slice(&self.params.parallelism.to_le_bytes());
        blob.extend_from_slice(&self.session_salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a payload produced by [`Sealer::seal`] under the same password.
    ///
    /// Fails with [`CryptoError::Decryption`] for a wrong password or any
    /// tampering; never returns partial plaintext.
    pub fn open(&self, blob: &[u8]) -> CryptoResult<Vec<u8>> {
        let payload = SealedPayload::parse(blob)?;
        let key = self.key_for(payload.salt, payload.params)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
        cipher
            .decrypt(XNonce::from_slice(payload.nonce), payload.ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }

    fn key_for(&self, salt: [u8; SALT_LEN], params: KdfParams) -> CryptoResult<Zeroizing<[u8; KEY_LEN]>> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = keys.get(&(salt, params)) {
            return Ok(key.clone());
        }
        let key = params.derive(&self.password, &salt)?;
        debug!(
            memory_kib = params.memory_kib,
            iterations = params.iterations,
            cached = keys.len(),
            "derived envelope key"
        );
        keys.insert((salt, params), key.clone());
        Ok(key)
    }
}

impl fmt::Debug for Sealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sealer")
            .field("password", &"<redacted>")
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CHEAP: KdfParams = KdfParams::new(256, 1, 1);

    #[test]
    fn seal_and_open() {
        let sealer = Sealer::new("correct horse", CHEAP);
        let blob = sealer.seal(b"{\"id\":\"d1\"}").unwrap();
        assert!(blob.starts_with(MAGIC));
        assert_eq!(sealer.open(&blob).unwrap(), b"{\"id\":\"d1\"}");
    }

    #[test]
    fn wrong_password_fails_cleanly() {
        let blob = Sealer::new("right", CHEAP).seal(b"secret dream").unwrap();
        let err = Sealer::new("wrong", CHEAP).open(&blob).unwrap_err();
        assert_eq!(err, CryptoError::Decryption);
    }

    #[test]
    fn tampering_is_detected() {
        let sealer = Sealer::new("pw", CHEAP);
        let mut blob = sealer.seal(b"do not touch").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert_eq!(sealer.open(&blob).unwrap_err(), CryptoError::Decryption);
    }

    #[test]
    fn other_session_with_same_password_can_open() {
        let blob = Sealer::new("pw", CHEAP).seal(b"portable").unwrap();
        // New sealer: different session salt, different configured costs.
        let later = Sealer::new("pw", KdfParams::new(512, 2, 1));
        assert_eq!(later.open(&blob).unwrap(), b"portable");
    }

    #[test]
    fn nonces_are_fresh() {
        let sealer = Sealer::new("pw", CHEAP);
        let a = sealer.seal(b"same").unwrap();
        let b = sealer.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn session_key_is_derived_once() {
        let sealer = Sealer::new("pw", CHEAP);
        for _ in 0..5 {
            let blob = sealer.seal(b"x").unwrap();
            sealer.open(&blob).unwrap();
        }
        assert_eq!(sealer.keys.lock().unwrap().len(), 1);
    }

    #[test]
    fn short_payload_is_malformed() {
        let sealer = Sealer::new("pw", CHEAP);
        assert!(matches!(sealer.open(b"SJE1"), Err(CryptoError::Malformed(_))));
    }

    #[test]
    fn bad_magic_is_malformed() {
        let sealer = Sealer::new("pw", CHEAP);
        let mut blob = sealer.seal(b"x").unwrap();
        blob[0] = b'X';
        assert!(matches!(sealer.open(&blob), Err(CryptoError::Malformed(_))));
    }

    #[test]
    fn absurd_header_costs_are_rejected_before_derivation() {
        let sealer = Sealer::new("pw", CHEAP);
        let mut blob = sealer.seal(b"x").unwrap();
        blob[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(sealer.open(&blob), Err(CryptoError::Malformed(_))));
    }

    #[test]
    fn debug_redacts_password() {
        let sealer = Sealer::new("hunter2", CHEAP);
        let debug = format!("{sealer:?}");
        assert!(debug.contains("redacted"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn fingerprint_matches_password() {
        let sealer = Sealer::new("pw", CHEAP);
        assert_eq!(sealer.fingerprint(), PasswordFingerprint::of("pw"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn open_inverts_seal(text in ".{0,256}", password in "[a-zA-Z0-9]{1,24}") {
            let sealer = Sealer::new(&password, CHEAP);
            let blob = sealer.seal(text.as_bytes()).unwrap();
            prop_assert_eq!(sealer.open(&blob).unwrap(), text.as_bytes().to_vec());
        }
    }
}
