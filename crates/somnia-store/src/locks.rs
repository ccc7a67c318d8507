use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

/// Lock names used by the journal's mutating operations.
///
/// A caller needing both takes `DELETE_OPERATIONS` before a save lock.
pub mod names {
    use somnia_types::Collection;

    pub const SAVE_DREAMS: &str = "saveDreams";
    pub const SAVE_GOALS: &str = "saveGoals";
    pub const SAVE_VOICE_NOTE: &str = "saveVoiceNote";
    pub const SAVE_AUTOCOMPLETE: &str = "saveAutocomplete";
    pub const DELETE_OPERATIONS: &str = "deleteOperations";

    /// Lock guarding writes to `collection`.
    pub const fn save(collection: Collection) -> &'static str {
        match collection {
            Collection::Dreams => SAVE_DREAMS,
            Collection::Goals => SAVE_GOALS,
            Collection::VoiceNotes => SAVE_VOICE_NOTE,
            Collection::Autocomplete => SAVE_AUTOCOMPLETE,
        }
    }
}

type Slot = Arc<AsyncMutex<()>>;

/// Named FIFO locks serializing mutations within one process.
///
/// Each name maps to a tokio mutex, whose waiters are served in arrival
/// order. The table entry for a name is created on first use and removed
/// once nobody holds or waits for it.
#[derive(Default)]
pub struct LockRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

/// Releases the named lock and prunes its table entry on drop, including
/// during unwinding.
struct Held<'a> {
    registry: &'a LockRegistry,
    name: &'a str,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.registry.prune(self.name, &self.slot);
        trace!(lock = self.name, "released");
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` while holding the lock called `name`.
    ///
    /// Starts immediately when the lock is free, otherwise after every
    /// earlier caller for the same name has finished. The lock is released
    /// however the operation ends.
    pub async fn with_lock<F, Fut, T>(&self, name: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = self.slot(name);
        let guard = Arc::clone(&slot).lock_owned().await;
        let _held = Held {
            registry: self,
            name,
            slot,
            guard: Some(guard),
        };
        trace!(lock = name, "acquired");
        operation().await
    }

    /// Whether someone currently holds `name`.
    pub fn is_locked(&self, name: &str) -> bool {
        let slots = self.slots.lock().expect("lock table poisoned");
        slots
            .get(name)
            .map(|slot| slot.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Names with a holder or waiters.
    pub fn active(&self) -> Vec<String> {
        let slots = self.slots.lock().expect("lock table poisoned");
        let mut names: Vec<String> = slots.keys().cloned().collect();
        names.sort();
        names
    }

    fn slot(&self, name: &str) -> Slot {
        let mut slots = self.slots.lock().expect("lock table poisoned");
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    fn prune(&self, name: &str, slot: &Slot) {
        let mut slots = self.slots.lock().expect("lock table poisoned");
        // One reference in the table, one held by the caller: nobody else waits.
        if Arc::strong_count(slot) == 2 {
            slots.remove(name);
        }
    }
}

impl std::fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry")
            .field("active", &self.active())
            .finish()
    }
}
