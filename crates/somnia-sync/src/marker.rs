use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use somnia_store::{KeyValueStore, StoreResult};
use somnia_types::{format_timestamp, parse_timestamp, Timestamp};

/// Flat-store key holding the time of the last successful sync.
pub const LAST_SYNC_KEY: &str = "lastSyncTime";

/// Time of the last successful sync, kept in the flat key-value store.
///
/// The marker only moves forward. It is written after a verified upload or a
/// completed download and removed only by [`SyncMarker::clear`].
#[derive(Clone)]
pub struct SyncMarker {
    kv: Arc<dyn KeyValueStore>,
}

impl SyncMarker {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// `None` if no sync has happened. An unreadable value counts as none.
    pub fn last_sync(&self) -> StoreResult<Option<Timestamp>> {
        let Some(raw) = self.kv.get_item(LAST_SYNC_KEY)? else {
            return Ok(None);
        };
        let parsed = parse_timestamp(&Value::String(raw.clone())).or_else(|| {
            raw.trim()
                .parse::<i64>()
                .ok()
                .and_then(|ms| parse_timestamp(&Value::from(ms)))
        });
        if parsed.is_none() {
            warn!(value = %raw, "ignoring unparsable sync marker");
        }
        Ok(parsed)
    }

    /// Move the marker to `at` unless it already points later. Returns the
    /// marker's value afterwards.
    pub fn advance(&self, at: Timestamp) -> StoreResult<Timestamp> {
        match self.last_sync()? {
            Some(current) if current >= at => Ok(current),
            _ => {
                self.kv.set_item(LAST_SYNC_KEY, &format_timestamp(&at))?;
                debug!(at = %format_timestamp(&at), "sync marker advanced");
                Ok(at)
            }
        }
    }

    /// Forget the last sync. Returns `true` if a marker existed.
    pub fn clear(&self) -> StoreResult<bool> {
        self.kv.remove_item(LAST_SYNC_KEY)
    }
}

impl std::fmt::Debug for SyncMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMarker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use somnia_store::InMemoryKvStore;

    fn marker() -> (SyncMarker, Arc<InMemoryKvStore>) {
        let kv = Arc::new(InMemoryKvStore::new());
        (SyncMarker::new(kv.clone()), kv)
    }

    #[test]
    fn starts_empty() {
        let (marker, _) = marker();
        assert_eq!(marker.last_sync().unwrap(), None);
        assert!(!marker.clear().unwrap());
    }

    #[test]
    fn never_moves_backwards() {
        let (marker, _) = marker();
        let t = somnia_types::now();
        assert_eq!(marker.advance(t).unwrap(), t);
        assert_eq!(marker.advance(t - Duration::seconds(5)).unwrap(), t);
        assert_eq!(marker.last_sync().unwrap(), Some(t));
        let later = t + Duration::seconds(5);
        assert_eq!(marker.advance(later).unwrap(), later);
    }

    #[test]
    fn stored_in_record_timestamp_format() {
        let (marker, kv) = marker();
        let t = parse_timestamp(&Value::from("2024-03-01T07:15:00Z")).unwrap();
        marker.advance(t).unwrap();
        assert_eq!(
            kv.get_item(LAST_SYNC_KEY).unwrap().as_deref(),
            Some("2024-03-01T07:15:00.000Z")
        );
    }

    #[test]
    fn epoch_millis_and_garbage() {
        let (marker, kv) = marker();
        kv.set_item(LAST_SYNC_KEY, "1704067200000").unwrap();
        assert_eq!(marker.last_sync().unwrap().unwrap().timestamp(), 1_704_067_200);
        kv.set_item(LAST_SYNC_KEY, "soon").unwrap();
        assert_eq!(marker.last_sync().unwrap(), None);
    }

    #[test]
    fn clear_removes_marker() {
        let (marker, _) = marker();
        marker.advance(somnia_types::now()).unwrap();
        assert!(marker.clear().unwrap());
        assert_eq!(marker.last_sync().unwrap(), None);
    }
}
