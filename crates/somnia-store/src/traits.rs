use somnia_types::{Collection, StoredValue, TypeError};

use crate::error::{StoreError, StoreResult};
use crate::selector::StorageMode;

/// Collection-scoped record storage.
///
/// All implementations must satisfy these invariants:
/// - `id` is the primary key within a collection.
/// - `put` is an upsert: an existing value with the same id is replaced
///   whole, in its original position. Fields are never merged.
/// - `get_all` returns values in insertion order.
/// - `replace` is atomic: readers observe either the old or the new contents.
/// - Missing collections read as empty, never as an error.
/// - The backend never interprets values beyond their `id`.
pub trait RecordBackend: Send + Sync {
    /// Durability tier this backend provides.
    fn mode(&self) -> StorageMode;

    /// Read one value. Returns `Ok(None)` if it does not exist.
    fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<StoredValue>>;

    /// Read every value of a collection.
    fn get_all(&self, collection: Collection) -> StoreResult<Vec<StoredValue>>;

    /// Insert or replace one value.
    fn put(&self, collection: Collection, value: &StoredValue) -> StoreResult<()>;

    /// Delete a value by id. Returns `true` if it existed.
    fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool>;

    /// Atomically replace the whole collection with `values`.
    fn replace(&self, collection: Collection, values: &[StoredValue]) -> StoreResult<()>;

    /// Upsert several values.
    ///
    /// Default implementation calls `put()` for each value. Backends may
    /// override for better performance (e.g., single flush).
    fn put_batch(&self, collection: Collection, values: &[StoredValue]) -> StoreResult<()> {
        values.iter().try_for_each(|value| self.put(collection, value))
    }

    /// Remove every value of a collection.
    fn clear(&self, collection: Collection) -> StoreResult<()> {
        self.replace(collection, &[])
    }

    /// Number of values in a collection.
    fn count(&self, collection: Collection) -> StoreResult<usize> {
        Ok(self.get_all(collection)?.len())
    }
}

/// Primary key of a value about to be written.
pub(crate) fn key_of(value: &StoredValue) -> StoreResult<&str> {
    match value.id() {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(StoreError::Validation(TypeError::MissingId)),
    }
}
