//! Foundation types for Somnia.
//!
//! This crate provides the record, collection, and envelope types shared by
//! every other Somnia crate.
//!
//! # Key Types
//!
//! - [`Record`] -- A journal entity (dream, goal, voice note, autocomplete list)
//! - [`Collection`] -- A named partition of records with one `id` namespace
//! - [`Envelope`] -- The encrypted-at-rest wrapper around a serialized record
//! - [`StoredValue`] -- What actually sits in a backend: plain or enveloped
//! - [`Timestamp`] -- UTC wall-clock instant used for `created`/`modified`

pub mod collection;
pub mod envelope;
pub mod error;
pub mod record;
pub mod temporal;

pub use collection::Collection;
pub use envelope::{EncryptedFlag, Envelope, StoredValue};
pub use error::TypeError;
pub use record::Record;
pub use temporal::{format_timestamp, format_timestamp_exact, now, parse_timestamp, Timestamp};
