use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TypeError;
use crate::temporal::{parse_timestamp, Timestamp};

/// A journal entity: dream entry, goal, voice memo, or autocomplete list.
///
/// Records are free-form JSON objects. The storage core only reasons about
/// the `id` and the timestamp fields (`created`, `modified`, `timestamp`);
/// everything else is carried through untouched.
///
/// `serde_json::Map` keeps keys sorted, so the serialized form of a record is
/// canonical: equal records always serialize to identical bytes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// A record holding only an `id`.
    pub fn new(id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("id".into(), Value::String(id.into()));
        Self(fields)
    }

    /// Wrap a JSON value; it must be an object.
    pub fn from_value(value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(TypeError::NotAnObject(type_name(&other).into())),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// The record's primary key, if it has a string `id`.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    pub fn created(&self) -> Option<Timestamp> {
        self.0.get("created").and_then(parse_timestamp)
    }

    pub fn modified(&self) -> Option<Timestamp> {
        self.0.get("modified").and_then(parse_timestamp)
    }

    /// Legacy single-timestamp field used by older dream entries.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.0.get("timestamp").and_then(parse_timestamp)
    }

    /// Best-known time of last change: `modified`, else `created`, else
    /// `timestamp`. `None` means the record carries no usable time at all.
    pub fn last_changed(&self) -> Option<Timestamp> {
        self.modified()
            .or_else(|| self.created())
            .or_else(|| self.timestamp())
    }

    /// Whether the record carries the envelope marker `encrypted: true`.
    ///
    /// Valid plain records never do; seeing it on a loaded plain record means
    /// an envelope whose payload could not be decoded.
    pub fn claims_encrypted(&self) -> bool {
        matches!(self.0.get("encrypted"), Some(Value::Bool(true)))
    }

    /// Check the fields the storage core depends on.
    pub fn validate(&self) -> Result<(), TypeError> {
        let id = match self.id() {
            Some(id) if !id.is_empty() => id,
            _ => return Err(TypeError::MissingId),
        };
        for field in ["created", "modified", "timestamp"] {
            if let Some(value) = self.0.get(field) {
                if parse_timestamp(value).is_none() {
                    return Err(TypeError::InvalidTimestamp {
                        field: field.to_string(),
                    });
                }
            }
        }
        if self.claims_encrypted() {
            return Err(TypeError::ReservedMarker { id: id.to_string() });
        }
        Ok(())
    }

    /// Canonical JSON encoding (sorted keys, no whitespace).
    pub fn to_canonical_json(&self) -> Result<String, TypeError> {
        serde_json::to_string(&self.0).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Parse the canonical JSON encoding back into a record.
    pub fn from_json(text: &str) -> Result<Self, TypeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Self::from_value(value)
    }
}

impl TryFrom<Value> for Record {
    type Error = TypeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
