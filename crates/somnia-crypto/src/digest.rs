use std::fmt;

const FINGERPRINT_DOMAIN: &str = "somnia-password-fingerprint-v1";
const CIPHERTEXT_DOMAIN: &str = "somnia-ciphertext-v1";

fn domain_hash(domain: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain.as_bytes());
    hasher.update(b":");
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Identity of a session password, used to notice password changes.
///
/// Held in memory only and never persisted. It lets caches tied to one
/// password detect that the active password is no longer the same.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PasswordFingerprint([u8; 32]);

impl PasswordFingerprint {
    pub fn of(password: &str) -> Self {
        Self(domain_hash(FINGERPRINT_DOMAIN, password.as_bytes()))
    }

    /// Short hex form (first 8 characters), safe to log.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for PasswordFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PasswordFingerprint({}...)", self.short_hex())
    }
}

/// Domain-separated digest of an envelope payload.
///
/// Cache entries remember the digest of the ciphertext they were decrypted
/// from, so a rewritten envelope is never answered from a stale entry.
pub fn ciphertext_digest(data: &[u8]) -> [u8; 32] {
    domain_hash(CIPHERTEXT_DOMAIN, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(PasswordFingerprint::of("hunter2"), PasswordFingerprint::of("hunter2"));
    }

    #[test]
    fn different_passwords_differ() {
        assert_ne!(PasswordFingerprint::of("a"), PasswordFingerprint::of("b"));
    }

    #[test]
    fn domains_are_separated() {
        let fp = PasswordFingerprint::of("same");
        assert_ne!(fp.0, ciphertext_digest(b"same"));
    }

    #[test]
    fn debug_does_not_leak_full_digest() {
        let fp = PasswordFingerprint::of("secret");
        let debug = format!("{fp:?}");
        assert!(debug.starts_with("PasswordFingerprint("));
        assert!(!debug.contains("secret"));
        assert_eq!(fp.short_hex().len(), 8);
    }
}
