use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use somnia_store::{lock_names, LockRegistry, Vault};
use somnia_types::{Collection, Record, Timestamp};

use crate::error::{SyncError, SyncResult};

/// Document format version written by this crate.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The journal as exchanged with a remote: plaintext dreams, goals and
/// autocomplete lists, stamped with the time it was taken.
///
/// Voice notes are device-local and never part of a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(with = "export_date")]
    pub export_date: Timestamp,
    #[serde(default)]
    pub version: u32,
    pub data: SnapshotData,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    #[serde(default)]
    pub dreams: Vec<Record>,
    #[serde(default)]
    pub goals: Vec<Record>,
    /// Autocomplete lists keyed by record id.
    #[serde(default)]
    pub autocomplete: BTreeMap<String, Record>,
}

impl SnapshotData {
    /// Records to write into `collection`, or `None` for collections a
    /// snapshot does not carry.
    ///
    /// Autocomplete entries lacking an `id` take their map key.
    pub fn records(&self, collection: Collection) -> Option<Vec<Record>> {
        match collection {
            Collection::Dreams => Some(self.dreams.clone()),
            Collection::Goals => Some(self.goals.clone()),
            Collection::Autocomplete => Some(
                self.autocomplete
                    .iter()
                    .map(|(key, record)| match record.id() {
                        Some(_) => record.clone(),
                        None => record.clone().with("id", key.as_str()),
                    })
                    .collect(),
            ),
            Collection::VoiceNotes => None,
        }
    }

    pub fn len(&self) -> usize {
        self.dreams.len() + self.goals.len() + self.autocomplete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Snapshot {
    /// Collections carried by a snapshot, in the order they are restored.
    pub const COLLECTIONS: [Collection; 3] =
        [Collection::Dreams, Collection::Goals, Collection::Autocomplete];

    /// Read the current journal through the vault.
    ///
    /// Fails if any record of a synced collection cannot be decrypted, so a
    /// partial journal is never exported.
    pub fn capture(vault: &Vault, export_date: Timestamp) -> SyncResult<Self> {
        let mut data = SnapshotData::default();
        for collection in Self::COLLECTIONS {
            let records = vault.get_all(collection)?;
            let stored = vault.store().get_all(collection)?.len();
            if records.len() < stored {
                return Err(SyncError::Snapshot(format!(
                    "{} of {stored} {collection} records could not be read",
                    stored - records.len()
                )));
            }
            match collection {
                Collection::Dreams => data.dreams = records,
                Collection::Goals => data.goals = records,
                _ => {
                    data.autocomplete = records
                        .into_iter()
                        .filter_map(|r| r.id().map(str::to_string).map(|id| (id, r)))
                        .collect();
                }
            }
        }
        debug!(records = data.len(), "snapshot captured");
        Ok(Self {
            export_date,
            version: SNAPSHOT_VERSION,
            data,
        })
    }

    /// Check every record the snapshot would write.
    pub fn validate(&self) -> SyncResult<()> {
        for collection in Self::COLLECTIONS {
            for record in self.data.records(collection).unwrap_or_default() {
                record.validate().map_err(|e| {
                    SyncError::Snapshot(format!("{collection}: {e}"))
                })?;
            }
        }
        Ok(())
    }

    /// Validate, then replace each carried collection under its save lock.
    /// Returns the number of records written.
    ///
    /// Nothing is written if any record is invalid. Collections are replaced
    /// one at a time; each replacement is atomic.
    pub async fn restore(&self, vault: &Vault, locks: &LockRegistry) -> SyncResult<usize> {
        self.validate()?;
        let mut written = 0;
        for collection in Self::COLLECTIONS {
            let records = self.data.records(collection).unwrap_or_default();
            let count = records.len();
            locks
                .with_lock(lock_names::save(collection), move || async move {
                    vault.try_replace_all(collection, records)
                })
                .await?;
            debug!(%collection, count, "collection restored");
            written += count;
        }
        Ok(written)
    }

    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SyncError::Snapshot(e.to_string()))
    }

    pub fn from_json(text: &str) -> SyncResult<Self> {
        serde_json::from_str(text).map_err(|e| SyncError::Snapshot(e.to_string()))
    }
}

/// `exportDate` is written in the record timestamp format and read back
/// from any RFC 3339 string or epoch-millisecond number.
mod export_date {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    use somnia_types::{format_timestamp, parse_timestamp, Timestamp};

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse_timestamp(&value).ok_or_else(|| D::Error::custom("exportDate is not a timestamp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Snapshot {
        let mut data = SnapshotData::default();
        data.dreams.push(
            Record::new("d1")
                .with("title", "Flying")
                .with("created", "2024-03-01T07:15:00.000Z"),
        );
        data.goals.push(Record::new("g1").with("text", "Lucid"));
        data.autocomplete
            .insert("tags".into(), Record::new("tags").with("items", json!(["sea"])));
        Snapshot {
            export_date: somnia_types::now(),
            version: SNAPSHOT_VERSION,
            data,
        }
    }

    #[test]
    fn document_uses_camel_case_keys() {
        let snap = sample();
        let text = snap.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value["exportDate"].as_str().unwrap().ends_with('Z'));
        assert_eq!(value["data"]["autocomplete"]["tags"]["id"], "tags");
        assert_eq!(Snapshot::from_json(&text).unwrap(), snap);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let snap = Snapshot::from_json(r#"{"exportDate":"2024-01-01T00:00:00Z","data":{}}"#).unwrap();
        assert_eq!(snap.version, 0);
        assert!(snap.data.is_empty());
    }

    #[test]
    fn epoch_millis_export_date_is_accepted() {
        let snap = Snapshot::from_json(r#"{"exportDate":1704067200000,"data":{}}"#).unwrap();
        assert_eq!(snap.export_date.timestamp(), 1_704_067_200);
    }

    #[test]
    fn garbage_is_a_snapshot_error() {
        assert!(matches!(Snapshot::from_json("not json"), Err(SyncError::Snapshot(_))));
        assert!(matches!(
            Snapshot::from_json(r#"{"exportDate":"yesterday","data":{}}"#),
            Err(SyncError::Snapshot(_))
        ));
    }

    #[test]
    fn autocomplete_key_fills_missing_id() {
        let mut data = SnapshotData::default();
        data.autocomplete
            .insert("people".into(), Record::default().with("items", json!([])));
        let records = data.records(Collection::Autocomplete).unwrap();
        assert_eq!(records[0].id(), Some("people"));
        assert!(data.records(Collection::VoiceNotes).is_none());
    }

    #[test]
    fn validate_rejects_records_without_id() {
        let mut snap = sample();
        snap.data.dreams.push(Record::default().with("title", "anon"));
        assert!(matches!(snap.validate(), Err(SyncError::Snapshot(_))));
        assert!(sample().validate().is_ok());
    }
}
