use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("record has no string id")]
    MissingId,

    #[error("record field `{field}` is not a valid timestamp")]
    InvalidTimestamp { field: String },

    #[error("plain record {id} carries the reserved `encrypted: true` marker")]
    ReservedMarker { id: String },

    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
