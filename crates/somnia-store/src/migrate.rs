use std::sync::Arc;

use serde::Serialize;
use somnia_types::{Collection, StoredValue};
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;
use crate::structured::StructuredStore;
use crate::traits::{key_of, RecordBackend};

/// Schema version written by this release.
///
/// 1: dreams, voice notes. 2: goals. 3: autocomplete.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// What a migrator run did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    /// Collections created by this run.
    pub created: Vec<Collection>,
    /// Flat arrays moved into the structured store, with their item counts.
    pub migrated: Vec<(Collection, usize)>,
    /// Flat arrays left in place, with the reason.
    pub skipped: Vec<(Collection, String)>,
}

impl MigrationReport {
    /// `true` when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.from_version == self.to_version
            && self.created.is_empty()
            && self.migrated.is_empty()
            && self.skipped.is_empty()
    }
}

/// Moves flat key-value data into the structured store.
///
/// A run creates collections introduced after the stored schema version,
/// records the new version, then consumes every flat collection array
/// (`dreamJournalEntries`, `dreamJournalGoals`, `dreamJournalVoiceNotes`,
/// and the fallback-tier `dreamJournalAutocomplete`). An array is removed
/// only after every item reads back from the structured store; on any
/// failure it stays where it is and the next run retries.
pub struct Migrator {
    structured: Arc<StructuredStore>,
    kv: Arc<dyn KeyValueStore>,
}

impl Migrator {
    pub fn new(structured: Arc<StructuredStore>, kv: Arc<dyn KeyValueStore>) -> Self {
        Self { structured, kv }
    }

    /// Run the migration. Safe to call repeatedly.
    pub fn run(&self) -> StoreResult<MigrationReport> {
        let from_version = self.structured.schema_version();
        let mut report = MigrationReport {
            from_version,
            to_version: from_version.max(CURRENT_SCHEMA_VERSION),
            ..MigrationReport::default()
        };

        if from_version > CURRENT_SCHEMA_VERSION {
            warn!(
                stored = from_version,
                supported = CURRENT_SCHEMA_VERSION,
                "store written by a newer release"
            );
        }

        for collection in Collection::ALL {
            if self.structured.ensure_collection(collection)? {
                report.created.push(collection);
            }
        }
        if from_version < CURRENT_SCHEMA_VERSION {
            self.structured.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        }

        for collection in Collection::ALL {
            let key = collection.kv_key();
            let Some(raw) = self.kv.get_item(key)? else {
                continue;
            };
            match self.migrate_array(collection, &raw) {
                Ok(count) => {
                    self.kv.remove_item(key)?;
                    info!(%collection, count, key, "flat data migrated");
                    report.migrated.push((collection, count));
                }
                Err(e) => {
                    warn!(%collection, key, error = %e, "flat data left in place");
                    report.skipped.push((collection, e.to_string()));
                }
            }
        }

        if !report.is_noop() {
            info!(
                from = report.from_version,
                to = report.to_version,
                created = report.created.len(),
                migrated = report.migrated.len(),
                skipped = report.skipped.len(),
                "schema migration completed"
            );
        }
        Ok(report)
    }

    fn migrate_array(&self, collection: Collection, raw: &str) -> StoreResult<usize> {
        let values: Vec<StoredValue> = serde_json::from_str(raw)?;
        for value in &values {
            key_of(value)?;
        }
        self.structured.put_batch(collection, &values)?;

        for value in &values {
            let id = key_of(value)?;
            if self.structured.get(collection, id)?.is_none() {
                return Err(StoreError::VerificationFailed {
                    collection,
                    reason: format!("{id} not readable after write"),
                });
            }
        }
        Ok(values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use crate::structured::StructuredConfig;
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        structured: Arc<StructuredStore>,
        kv: Arc<dyn KeyValueStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let structured =
                Arc::new(StructuredStore::open(dir.path(), StructuredConfig::default()).unwrap());
            Self {
                _dir: dir,
                structured,
                kv: Arc::new(InMemoryKvStore::new()),
            }
        }

        fn migrator(&self) -> Migrator {
            Migrator::new(Arc::clone(&self.structured), Arc::clone(&self.kv))
        }
    }

    #[test]
    fn fresh_store_gets_every_collection() {
        let fx = Fixture::new();
        let report = fx.migrator().run().unwrap();
        assert_eq!(report.from_version, 0);
        assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(report.created, Collection::ALL.to_vec());
        assert_eq!(fx.structured.schema_version(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn upgrade_from_v1_adds_goals_and_autocomplete() {
        let fx = Fixture::new();
        fx.structured.ensure_collection(Collection::Dreams).unwrap();
        fx.structured.ensure_collection(Collection::VoiceNotes).unwrap();
        fx.structured.set_schema_version(1).unwrap();

        let report = fx.migrator().run().unwrap();
        assert_eq!(report.created, vec![Collection::Goals, Collection::Autocomplete]);
        assert_eq!(fx.structured.schema_version(), 3);
    }

    #[test]
    fn legacy_arrays_are_moved_then_removed() {
        let fx = Fixture::new();
        fx.kv
            .set_item(
                "dreamJournalEntries",
                &json!([
                    {"id": "d1", "title": "Flying", "timestamp": "2023-01-01T00:00:00.000Z"},
                    {"id": "d2", "title": "Falling", "timestamp": "2023-01-02T00:00:00.000Z"}
                ])
                .to_string(),
            )
            .unwrap();
        fx.kv
            .set_item("dreamJournalGoals", &json!([{"id": "g1"}]).to_string())
            .unwrap();

        let report = fx.migrator().run().unwrap();
        assert_eq!(
            report.migrated,
            vec![(Collection::Dreams, 2), (Collection::Goals, 1)]
        );
        assert!(fx.kv.get_item("dreamJournalEntries").unwrap().is_none());
        assert!(fx.kv.get_item("dreamJournalGoals").unwrap().is_none());
        assert_eq!(fx.structured.count(Collection::Dreams).unwrap(), 2);
        assert!(fx.structured.get(Collection::Goals, "g1").unwrap().is_some());
    }

    #[test]
    fn migration_is_idempotent() {
        let fx = Fixture::new();
        fx.kv
            .set_item("dreamJournalEntries", &json!([{"id": "d1"}]).to_string())
            .unwrap();

        let first = fx.migrator().run().unwrap();
        assert!(!first.is_noop());
        let after_first = fx.structured.get_all(Collection::Dreams).unwrap();

        let second = fx.migrator().run().unwrap();
        assert!(second.is_noop(), "{second:?}");
        assert_eq!(fx.structured.get_all(Collection::Dreams).unwrap(), after_first);
    }

    #[test]
    fn unparsable_array_is_kept() {
        let fx = Fixture::new();
        fx.kv.set_item("dreamJournalEntries", "[{\"id\":").unwrap();

        let report = fx.migrator().run().unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, Collection::Dreams);
        assert!(fx.kv.get_item("dreamJournalEntries").unwrap().is_some());
        assert!(fx.structured.get_all(Collection::Dreams).unwrap().is_empty());
    }

    #[test]
    fn items_without_ids_keep_the_array() {
        let fx = Fixture::new();
        fx.kv
            .set_item("dreamJournalEntries", &json!([{"id": "ok"}, {"title": "orphan"}]).to_string())
            .unwrap();

        let report = fx.migrator().run().unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert!(fx.kv.get_item("dreamJournalEntries").unwrap().is_some());
        // Nothing partially written.
        assert!(fx.structured.get(Collection::Dreams, "ok").unwrap().is_none());
    }

    #[test]
    fn unrelated_keys_are_untouched() {
        let fx = Fixture::new();
        fx.kv.set_item("lastSyncTime", "2024-01-01T00:00:00.000Z").unwrap();
        fx.migrator().run().unwrap();
        assert!(fx.kv.get_item("lastSyncTime").unwrap().is_some());
    }
}
