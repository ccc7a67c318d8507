use std::sync::Arc;

use somnia_types::{Collection, StoredValue, TypeError};
use tracing::debug;

use crate::error::StoreResult;
use crate::selector::Backends;

/// Collection-scoped CRUD over whichever backend serves each collection.
///
/// Knows nothing about encryption: values go in and come out exactly as
/// stored. Writes are validated first and rejected without touching storage.
#[derive(Clone)]
pub struct RecordStore {
    backends: Arc<Backends>,
}

impl RecordStore {
    pub fn new(backends: Arc<Backends>) -> Self {
        Self { backends }
    }

    pub fn backends(&self) -> &Arc<Backends> {
        &self.backends
    }

    /// Returns `Ok(None)` when the id or the collection does not exist.
    pub fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<StoredValue>> {
        self.backends.backend_for(collection).get(collection, id)
    }

    /// Every value of a collection; empty when the collection is absent.
    pub fn get_all(&self, collection: Collection) -> StoreResult<Vec<StoredValue>> {
        self.backends.backend_for(collection).get_all(collection)
    }

    /// Validate and upsert one value.
    pub fn put(&self, collection: Collection, value: StoredValue) -> StoreResult<()> {
        validate(&value)?;
        self.backends.backend_for(collection).put(collection, &value)?;
        debug!(%collection, id = value.id(), encrypted = value.is_encrypted(), "value stored");
        Ok(())
    }

    /// Replace the whole collection. Every value is validated before
    /// anything is written; the swap itself is atomic.
    pub fn replace_all(&self, collection: Collection, values: Vec<StoredValue>) -> StoreResult<()> {
        for value in &values {
            validate(value)?;
        }
        self.backends
            .backend_for(collection)
            .replace(collection, &values)?;
        debug!(%collection, count = values.len(), "collection replaced");
        Ok(())
    }

    /// Returns `true` if the value existed.
    pub fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        let existed = self.backends.backend_for(collection).delete(collection, id)?;
        debug!(%collection, id, existed, "value deleted");
        Ok(existed)
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("mode", &self.backends.mode())
            .finish()
    }
}

fn validate(value: &StoredValue) -> Result<(), TypeError> {
    match value {
        StoredValue::Plain(record) => record.validate(),
        StoredValue::Encrypted(envelope) if envelope.id.is_empty() => Err(TypeError::MissingId),
        StoredValue::Encrypted(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::selector::BackendSelector;
    use crate::config::StoreConfig;
    use somnia_types::Record;

    fn store() -> RecordStore {
        RecordStore::new(Arc::new(Backends::in_memory()))
    }

    fn goal(id: &str) -> StoredValue {
        Record::new(id)
            .with("title", "Reality check hourly")
            .with("created", "2024-02-01T00:00:00.000Z")
            .into()
    }

    #[test]
    fn get_missing_is_none() {
        let s = store();
        assert!(s.get(Collection::Goals, "nope").unwrap().is_none());
        assert!(s.get_all(Collection::Goals).unwrap().is_empty());
    }

    #[test]
    fn put_then_get() {
        let s = store();
        s.put(Collection::Goals, goal("g1")).unwrap();
        assert_eq!(s.get(Collection::Goals, "g1").unwrap(), Some(goal("g1")));
    }

    #[test]
    fn invalid_record_is_rejected_without_writing() {
        let s = store();
        let bad: StoredValue = Record::new("g1").with("created", "someday").into();
        assert!(matches!(
            s.put(Collection::Goals, bad),
            Err(StoreError::Validation(TypeError::InvalidTimestamp { .. }))
        ));
        assert!(s.get_all(Collection::Goals).unwrap().is_empty());
    }

    #[test]
    fn plain_record_cannot_claim_encryption() {
        let s = store();
        let forged: StoredValue = Record::new("x").with("encrypted", true).into();
        assert!(s.put(Collection::Dreams, forged).is_err());
    }

    #[test]
    fn replace_all_then_get_all_is_exact() {
        let s = store();
        s.put(Collection::Goals, goal("stale")).unwrap();
        let batch = vec![goal("a"), goal("b"), goal("c")];
        s.replace_all(Collection::Goals, batch.clone()).unwrap();
        assert_eq!(s.get_all(Collection::Goals).unwrap(), batch);
    }

    #[test]
    fn replace_all_with_one_invalid_value_keeps_old_contents() {
        let s = store();
        s.put(Collection::Goals, goal("keep")).unwrap();
        let batch = vec![goal("a"), Record::default().into()];
        assert!(s.replace_all(Collection::Goals, batch).is_err());
        assert_eq!(s.get_all(Collection::Goals).unwrap(), vec![goal("keep")]);
    }

    #[test]
    fn delete_reports_presence() {
        let s = store();
        s.put(Collection::Goals, goal("g1")).unwrap();
        assert!(s.delete(Collection::Goals, "g1").unwrap());
        assert!(!s.delete(Collection::Goals, "g1").unwrap());
    }

    #[tokio::test]
    async fn works_over_the_structured_store() {
        let dir = tempfile::tempdir().unwrap();
        let backends = BackendSelector::new(StoreConfig::at(dir.path())).initialize().await;
        let s = RecordStore::new(backends);
        s.replace_all(Collection::Dreams, vec![goal("d1"), goal("d2")]).unwrap();
        s.put(Collection::Dreams, goal("d3")).unwrap();
        assert!(s.delete(Collection::Dreams, "d1").unwrap());
        let ids: Vec<_> = s
            .get_all(Collection::Dreams)
            .unwrap()
            .iter()
            .map(|v| v.id().unwrap().to_string())
            .collect();
        assert_eq!(ids, ["d2", "d3"]);
    }
}
