use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed table of async mutexes.
///
/// Entries are created on first use and removed once the last holder or
/// waiter for a key lets go, so the table only ever holds contended keys.
pub struct LockTable<K> {
    entries: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for LockTable<K> {
    fn default() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other guard for `key` is alive.
    pub async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let slot = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(key.clone()).or_default())
        };

        let guard = slot.lock_owned().await;
        KeyGuard { table: self, key, guard: Some(guard) }
    }

    /// Number of keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, key: &K) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            entries.remove(key);
        }
    }
}

#[must_use = "the key is unlocked as soon as the guard is dropped"]
pub struct KeyGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    table: &'a LockTable<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // The owned guard holds a reference to the slot; release it before
        // checking whether anyone else still does.
        self.guard.take();
        self.table.release(&self.key);
    }
}
