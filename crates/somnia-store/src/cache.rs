use std::collections::HashMap;
use std::sync::Mutex;

use somnia_crypto::PasswordFingerprint;
use somnia_types::{Collection, Record};

struct Entry {
    digest: [u8; 32],
    record: Record,
}

#[derive(Default)]
struct State {
    owner: Option<PasswordFingerprint>,
    entries: HashMap<String, Entry>,
}

/// Decrypted records keyed by `collection:id`, valid for one password.
///
/// An entry is only returned for the exact ciphertext it was decrypted from.
/// Never persisted.
#[derive(Default)]
pub struct DecryptedCache {
    state: Mutex<State>,
}

fn cache_key(collection: Collection, id: &str) -> String {
    format!("{collection}:{id}")
}

impl DecryptedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the cache to `owner`. Clears it if the owner changed; `None`
    /// (no password, or encryption off) always leaves it empty. Returns
    /// `true` if entries were dropped.
    pub fn bind(&self, owner: Option<PasswordFingerprint>) -> bool {
        let mut state = self.state.lock().expect("cache mutex poisoned");
        if state.owner == owner && owner.is_some() {
            return false;
        }
        let dropped = !state.entries.is_empty();
        state.entries.clear();
        state.owner = owner;
        dropped
    }

    pub fn get(&self, collection: Collection, id: &str, digest: &[u8; 32]) -> Option<Record> {
        let state = self.state.lock().expect("cache mutex poisoned");
        state
            .entries
            .get(&cache_key(collection, id))
            .filter(|entry| &entry.digest == digest)
            .map(|entry| entry.record.clone())
    }

    /// Store an entry. Ignored while the cache has no owner.
    pub fn insert(&self, collection: Collection, id: &str, digest: [u8; 32], record: Record) {
        let mut state = self.state.lock().expect("cache mutex poisoned");
        if state.owner.is_some() {
            state
                .entries
                .insert(cache_key(collection, id), Entry { digest, record });
        }
    }

    pub fn remove(&self, collection: Collection, id: &str) {
        let mut state = self.state.lock().expect("cache mutex poisoned");
        state.entries.remove(&cache_key(collection, id));
    }

    /// Drop every entry of one collection.
    pub fn remove_collection(&self, collection: Collection) {
        let prefix = format!("{collection}:");
        let mut state = self.state.lock().expect("cache mutex poisoned");
        state.entries.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn clear(&self) {
        self.state.lock().expect("cache mutex poisoned").entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("cache mutex poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound() -> DecryptedCache {
        let cache = DecryptedCache::new();
        cache.bind(Some(PasswordFingerprint::of("pw")));
        cache
    }

    #[test]
    fn hit_requires_same_digest() {
        let cache = bound();
        cache.insert(Collection::Dreams, "d1", [1; 32], Record::new("d1"));
        assert_eq!(cache.get(Collection::Dreams, "d1", &[1; 32]), Some(Record::new("d1")));
        assert!(cache.get(Collection::Dreams, "d1", &[2; 32]).is_none());
        assert!(cache.get(Collection::Goals, "d1", &[1; 32]).is_none());
    }

    #[test]
    fn owner_change_clears() {
        let cache = bound();
        cache.insert(Collection::Dreams, "d1", [1; 32], Record::new("d1"));
        assert!(!cache.bind(Some(PasswordFingerprint::of("pw"))));
        assert_eq!(cache.len(), 1);
        assert!(cache.bind(Some(PasswordFingerprint::of("other"))));
        assert!(cache.is_empty());
    }

    #[test]
    fn unowned_cache_stays_empty() {
        let cache = bound();
        cache.insert(Collection::Dreams, "d1", [1; 32], Record::new("d1"));
        assert!(cache.bind(None));
        cache.insert(Collection::Dreams, "d2", [2; 32], Record::new("d2"));
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_collection_is_scoped() {
        let cache = bound();
        cache.insert(Collection::Dreams, "x", [1; 32], Record::new("x"));
        cache.insert(Collection::Goals, "x", [1; 32], Record::new("x"));
        cache.remove_collection(Collection::Dreams);
        assert!(cache.get(Collection::Dreams, "x", &[1; 32]).is_none());
        assert!(cache.get(Collection::Goals, "x", &[1; 32]).is_some());
    }
}
