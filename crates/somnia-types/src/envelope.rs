use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::record::Record;
use crate::temporal::Timestamp;

/// The literal `encrypted: true` marker of an [`Envelope`].
///
/// Serializes as `true` and refuses to deserialize from anything else, so a
/// value is only ever read back as an envelope when it says so explicitly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncryptedFlag;

impl Serialize for EncryptedFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for EncryptedFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if bool::deserialize(deserializer)? {
            Ok(EncryptedFlag)
        } else {
            Err(serde::de::Error::custom("envelope marker must be `true`"))
        }
    }
}

/// Encrypted-at-rest wrapper around a serialized [`Record`].
///
/// On-disk shape:
/// ```text
/// { "id": "...", "encrypted": true, "data": "<base64>", "created": "...", "modified": "..." }
/// ```
///
/// `created` and `modified` are authoritative: they are restored onto the
/// decrypted record, replacing whatever copies the ciphertext holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub id: String,
    pub encrypted: EncryptedFlag,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub created: Timestamp,
    pub modified: Timestamp,
}

impl Envelope {
    pub fn new(id: impl Into<String>, data: Vec<u8>, created: Timestamp, modified: Timestamp) -> Self {
        Self {
            id: id.into(),
            encrypted: EncryptedFlag,
            data,
            created,
            modified,
        }
    }
}

/// A value as persisted by a backend: either a plain record or an envelope.
///
/// The variant is decided once, at deserialization. Envelopes are tried first
/// and must match the envelope shape exactly; everything else is a plain
/// record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Encrypted(Envelope),
    Plain(Record),
}

impl StoredValue {
    /// Primary key of the stored value.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Encrypted(env) => Some(env.id.as_str()),
            Self::Plain(record) => record.id(),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }

    /// Best-known time of last change without decrypting.
    pub fn last_changed(&self) -> Option<Timestamp> {
        match self {
            Self::Encrypted(env) => Some(env.modified),
            Self::Plain(record) => record.last_changed(),
        }
    }
}

impl From<Record> for StoredValue {
    fn from(record: Record) -> Self {
        Self::Plain(record)
    }
}

impl From<Envelope> for StoredValue {
    fn from(envelope: Envelope) -> Self {
        Self::Encrypted(envelope)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::parse_timestamp;
    use serde_json::json;

    fn ts(s: &str) -> Timestamp {
        parse_timestamp(&json!(s)).unwrap()
    }

    fn envelope() -> Envelope {
        Envelope::new(
            "d1",
            vec![0xde, 0xad, 0xbe, 0xef],
            ts("2024-03-01T07:15:00.000Z"),
            ts("2024-03-02T08:00:00.000Z"),
        )
    }

    #[test]
    fn envelope_serializes_with_marker_and_base64() {
        let value = serde_json::to_value(envelope()).unwrap();
        assert_eq!(value["encrypted"], json!(true));
        assert_eq!(value["data"], json!("3q2+7w=="));
        assert_eq!(value["id"], json!("d1"));
    }

    #[test]
    fn envelope_json_decodes_as_encrypted() {
        let json = serde_json::to_string(&envelope()).unwrap();
        let stored: StoredValue = serde_json::from_str(&json).unwrap();
        assert_eq!(stored, StoredValue::Encrypted(envelope()));
        assert!(stored.is_encrypted());
        assert_eq!(stored.id(), Some("d1"));
    }

    #[test]
    fn plain_record_decodes_as_plain() {
        let stored: StoredValue =
            serde_json::from_value(json!({"id": "g1", "title": "Recall 3 dreams"})).unwrap();
        assert!(matches!(stored, StoredValue::Plain(_)));
        assert_eq!(stored.id(), Some("g1"));
    }

    #[test]
    fn false_marker_is_plain() {
        let stored: StoredValue = serde_json::from_value(json!({
            "id": "x",
            "encrypted": false,
            "data": "AAAA",
            "created": "2024-01-01T00:00:00Z",
            "modified": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(matches!(stored, StoredValue::Plain(_)));
    }

    #[test]
    fn extra_fields_are_not_an_envelope() {
        let mut value = serde_json::to_value(envelope()).unwrap();
        value["title"] = json!("leaked");
        let stored: StoredValue = serde_json::from_value(value).unwrap();
        match stored {
            StoredValue::Plain(record) => assert!(record.claims_encrypted()),
            other => panic!("expected plain, got {other:?}"),
        }
    }

    #[test]
    fn last_changed_uses_envelope_modified() {
        let stored = StoredValue::from(envelope());
        assert_eq!(stored.last_changed(), Some(ts("2024-03-02T08:00:00.000Z")));
    }

    #[test]
    fn envelope_times_survive_serialization_exactly() {
        let mut env = envelope();
        env.modified = ts("2024-03-02T08:00:00.123456Z");
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.modified, env.modified);
    }
}
