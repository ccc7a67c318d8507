use std::collections::HashMap;
use std::sync::RwLock;

use somnia_types::{Collection, StoredValue};

use crate::error::StoreResult;
use crate::selector::StorageMode;
use crate::traits::{key_of, RecordBackend};

/// Insertion-ordered values of one collection, keyed by id.
#[derive(Clone, Debug, Default)]
pub(crate) struct Rows {
    values: Vec<StoredValue>,
}

impl Rows {
    pub(crate) fn from_values(values: Vec<StoredValue>) -> Self {
        let mut rows = Self::default();
        for value in values {
            rows.upsert(value);
        }
        rows
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.values.iter().position(|v| v.id() == Some(id))
    }

    pub(crate) fn get(&self, id: &str) -> Option<&StoredValue> {
        self.position(id).map(|i| &self.values[i])
    }

    /// Replace in place if the id exists, append otherwise.
    pub(crate) fn upsert(&mut self, value: StoredValue) {
        match value.id().and_then(|id| self.position(id)) {
            Some(i) => self.values[i] = value,
            None => self.values.push(value),
        }
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(i) => {
                self.values.remove(i);
                true
            }
            None => false,
        }
    }

    pub(crate) fn values(&self) -> &[StoredValue] {
        &self.values
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }
}

/// In-memory record backend.
///
/// Used as the last-resort tier when nothing durable is available, for blob
/// collections when the structured store is missing, and in tests. Contents
/// are lost when the process exits.
pub struct InMemoryBackend {
    collections: RwLock<HashMap<Collection, Rows>>,
}

impl InMemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of values across all collections.
    pub fn len(&self) -> usize {
        self.collections
            .read()
            .expect("lock poisoned")
            .values()
            .map(Rows::len)
            .sum()
    }

    /// Returns `true` if no collection holds a value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordBackend for InMemoryBackend {
    fn mode(&self) -> StorageMode {
        StorageMode::MemoryOnly
    }

    fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<StoredValue>> {
        let map = self.collections.read().expect("lock poisoned");
        Ok(map.get(&collection).and_then(|rows| rows.get(id)).cloned())
    }

    fn get_all(&self, collection: Collection) -> StoreResult<Vec<StoredValue>> {
        let map = self.collections.read().expect("lock poisoned");
        Ok(map
            .get(&collection)
            .map(|rows| rows.values().to_vec())
            .unwrap_or_default())
    }

    fn put(&self, collection: Collection, value: &StoredValue) -> StoreResult<()> {
        key_of(value)?;
        let mut map = self.collections.write().expect("lock poisoned");
        map.entry(collection).or_default().upsert(value.clone());
        Ok(())
    }

    fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        let mut map = self.collections.write().expect("lock poisoned");
        Ok(map
            .get_mut(&collection)
            .map(|rows| rows.remove(id))
            .unwrap_or(false))
    }

    fn replace(&self, collection: Collection, values: &[StoredValue]) -> StoreResult<()> {
        for value in values {
            key_of(value)?;
        }
        let rows = Rows::from_values(values.to_vec());
        self.collections
            .write()
            .expect("lock poisoned")
            .insert(collection, rows);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("value_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use somnia_types::Record;

    fn dream(id: &str, title: &str) -> StoredValue {
        Record::new(id).with("title", title).into()
    }

    fn titles(values: &[StoredValue]) -> Vec<String> {
        values
            .iter()
            .map(|v| match v {
                StoredValue::Plain(r) => r.get("title").unwrap().as_str().unwrap().to_string(),
                StoredValue::Encrypted(_) => panic!("unexpected envelope"),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn put_and_get() {
        let store = InMemoryBackend::new();
        store.put(Collection::Dreams, &dream("d1", "Flying")).unwrap();
        let back = store.get(Collection::Dreams, "d1").unwrap().expect("should exist");
        assert_eq!(back, dream("d1", "Flying"));
    }

    #[test]
    fn missing_collection_reads_empty() {
        let store = InMemoryBackend::new();
        assert!(store.get(Collection::Goals, "g1").unwrap().is_none());
        assert!(store.get_all(Collection::Goals).unwrap().is_empty());
        assert_eq!(store.count(Collection::Goals).unwrap(), 0);
    }

    #[test]
    fn collections_are_separate_namespaces() {
        let store = InMemoryBackend::new();
        store.put(Collection::Dreams, &dream("x", "dream")).unwrap();
        store.put(Collection::Goals, &dream("x", "goal")).unwrap();
        assert_eq!(titles(&store.get_all(Collection::Dreams).unwrap()), ["dream"]);
        assert_eq!(titles(&store.get_all(Collection::Goals).unwrap()), ["goal"]);
    }

    // -----------------------------------------------------------------------
    // Upsert semantics
    // -----------------------------------------------------------------------

    #[test]
    fn upsert_keeps_position_and_replaces_whole_record() {
        let store = InMemoryBackend::new();
        store.put(Collection::Dreams, &dream("a", "first")).unwrap();
        store
            .put(
                Collection::Dreams,
                &StoredValue::from(Record::new("b").with("title", "second").with("mood", "calm")),
            )
            .unwrap();
        store.put(Collection::Dreams, &dream("c", "third")).unwrap();

        store.put(Collection::Dreams, &dream("b", "second, edited")).unwrap();

        let all = store.get_all(Collection::Dreams).unwrap();
        assert_eq!(titles(&all), ["first", "second, edited", "third"]);
        match &all[1] {
            StoredValue::Plain(r) => assert!(r.get("mood").is_none()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn put_without_id_is_rejected() {
        let store = InMemoryBackend::new();
        let value: StoredValue = Record::default().with("title", "anon").into();
        let err = store.put(Collection::Dreams, &value).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(store.is_empty());
    }

    // -----------------------------------------------------------------------
    // Delete / Replace
    // -----------------------------------------------------------------------

    #[test]
    fn delete_reports_presence() {
        let store = InMemoryBackend::new();
        store.put(Collection::Goals, &dream("g1", "goal")).unwrap();
        assert!(store.delete(Collection::Goals, "g1").unwrap());
        assert!(!store.delete(Collection::Goals, "g1").unwrap());
        assert!(!store.delete(Collection::Dreams, "never").unwrap());
    }

    #[test]
    fn replace_sets_exact_contents() {
        let store = InMemoryBackend::new();
        store.put(Collection::Dreams, &dream("old", "old")).unwrap();
        store
            .replace(Collection::Dreams, &[dream("n1", "one"), dream("n2", "two")])
            .unwrap();
        assert_eq!(titles(&store.get_all(Collection::Dreams).unwrap()), ["one", "two"]);
        assert!(store.get(Collection::Dreams, "old").unwrap().is_none());
    }

    #[test]
    fn replace_with_invalid_value_changes_nothing() {
        let store = InMemoryBackend::new();
        store.put(Collection::Dreams, &dream("keep", "keep")).unwrap();
        let bad: StoredValue = Record::default().into();
        assert!(store.replace(Collection::Dreams, &[dream("n", "n"), bad]).is_err());
        assert_eq!(titles(&store.get_all(Collection::Dreams).unwrap()), ["keep"]);
    }

    #[test]
    fn clear_empties_one_collection() {
        let store = InMemoryBackend::new();
        store.put(Collection::Dreams, &dream("d", "d")).unwrap();
        store.put(Collection::Goals, &dream("g", "g")).unwrap();
        store.clear(Collection::Dreams).unwrap();
        assert!(store.get_all(Collection::Dreams).unwrap().is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn put_batch_upserts_each() {
        let store = InMemoryBackend::new();
        store
            .put_batch(Collection::Dreams, &[dream("a", "1"), dream("b", "2"), dream("a", "3")])
            .unwrap();
        assert_eq!(titles(&store.get_all(Collection::Dreams).unwrap()), ["3", "2"]);
    }

    // -----------------------------------------------------------------------
    // Ordering property
    // -----------------------------------------------------------------------

    proptest::proptest! {
        #[test]
        fn ids_keep_first_insertion_order(ids in proptest::collection::vec("[a-e]", 0..32)) {
            let store = InMemoryBackend::new();
            let mut expected: Vec<String> = Vec::new();
            for id in &ids {
                store.put(Collection::Dreams, &dream(id, id)).unwrap();
                if !expected.contains(id) {
                    expected.push(id.clone());
                }
            }
            let got: Vec<String> = store
                .get_all(Collection::Dreams)
                .unwrap()
                .iter()
                .map(|v| v.id().unwrap().to_string())
                .collect();
            proptest::prop_assert_eq!(got, expected);
        }
    }

    // -----------------------------------------------------------------------
    // Debug
    // -----------------------------------------------------------------------

    #[test]
    fn debug_format() {
        let store = InMemoryBackend::new();
        store.put(Collection::Dreams, &dream("x", "x")).unwrap();
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryBackend"));
        assert!(debug.contains("value_count"));
    }
}
