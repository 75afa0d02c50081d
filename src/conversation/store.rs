//! In-memory conversation store
//!
//! Two tables: the state of every active conversation, and an async lock
//! per conversation key. State reads and writes are short synchronous
//! critical sections; the key lock is held by a router from `check` until
//! `commit` so that one conversation never has two updates in flight.

use super::key::ConversationKey;
use super::state::{StateId, StoredState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;

type KeyLock = Arc<tokio::sync::Mutex<()>>;
type LockTable = Arc<Mutex<HashMap<ConversationKey, KeyLock>>>;

/// Mapping from conversation key to current state
#[derive(Default)]
pub struct ConversationStore {
    states: Mutex<HashMap<ConversationKey, StoredState>>,
    locks: LockTable,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ConversationKey) -> Option<StoredState> {
        self.states().get(key).cloned()
    }

    /// Insert or overwrite the state for `key`
    pub fn set(&self, key: ConversationKey, state: StoredState) {
        self.states().insert(key, state);
    }

    /// Remove the state for `key`. Removing an absent key is a no-op.
    pub fn delete(&self, key: &ConversationKey) -> Option<StoredState> {
        self.states().remove(key)
    }

    pub fn contains(&self, key: &ConversationKey) -> bool {
        self.states().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.states().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states().is_empty()
    }

    /// Snapshot of every conversation with a settled state
    pub fn active_states(&self) -> HashMap<ConversationKey, StateId> {
        self.states()
            .iter()
            .filter_map(|(key, state)| state.active().map(|s| (*key, s.clone())))
            .collect()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: ConversationKey) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key).or_default())
        };
        let mut waiter = Waiter {
            key,
            locks: &self.locks,
            waiting: true,
        };
        let guard = lock.lock_owned().await;
        waiter.waiting = false;
        KeyGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of keys currently locked or waited on
    pub fn locked_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<ConversationKey, StoredState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the lock entry when a `lock` call is abandoned while waiting
struct Waiter<'a> {
    key: ConversationKey,
    locks: &'a LockTable,
    waiting: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if !self.waiting {
            return;
        }
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The abandoned acquire has already released its reference
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Exclusive access to one conversation key, released on drop
pub struct KeyGuard {
    key: ConversationKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockTable,
}

impl KeyGuard {
    pub fn key(&self) -> ConversationKey {
        self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the table plus ours: nobody else holds or waits
        // on this key, and new waiters can only clone it under `locks`.
        if Arc::strong_count(OwnedMutexGuard::mutex(&guard)) == 2 {
            locks.remove(&self.key);
        }
        drop(guard);
    }
}

impl std::fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::state::{PendingState, Settled};
    use std::time::Duration;

    fn key(user_id: i64) -> ConversationKey {
        ConversationKey::new(Some(1), user_id)
    }

    #[test]
    fn test_set_get_delete() {
        let store = ConversationStore::new();
        assert!(store.get(&key(1)).is_none());

        store.set(key(1), StoredState::Active("A".into()));
        assert_eq!(store.get(&key(1)).unwrap().active(), Some(&StateId::from("A")));

        store.set(key(1), StoredState::Active("B".into()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key(1)).unwrap().active(), Some(&StateId::from("B")));

        assert!(store.delete(&key(1)).is_some());
        assert!(!store.contains(&key(1)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let store = ConversationStore::new();
        assert!(store.delete(&key(1)).is_none());
        assert!(store.delete(&key(1)).is_none());
    }

    #[test]
    fn test_active_states_skips_pending() {
        let store = ConversationStore::new();
        store.set(key(1), StoredState::Active("A".into()));
        store.set(
            key(2),
            StoredState::Pending {
                pending: PendingState::ready(Ok(Settled::End)),
                previous: None,
            },
        );

        let active = store.active_states();
        assert_eq!(active.len(), 1);
        assert_eq!(active.get(&key(1)), Some(&StateId::from("A")));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_lock_serializes_same_key() {
        let store = Arc::new(ConversationStore::new());
        let guard = store.lock(key(1)).await;

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _guard = store.lock(key(1)).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should acquire the lock")
            .unwrap();
    }

    #[tokio::test]
    async fn test_lock_does_not_block_other_keys() {
        let store = ConversationStore::new();
        let _first = store.lock(key(1)).await;
        let second = tokio::time::timeout(Duration::from_secs(1), store.lock(key(2))).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_lock_table_is_cleaned_up() {
        let store = ConversationStore::new();
        {
            let guard = store.lock(key(1)).await;
            assert_eq!(guard.key(), key(1));
            assert_eq!(store.locked_keys(), 1);
        }
        assert_eq!(store.locked_keys(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_cleans_up_lock_entry() {
        let store = ConversationStore::new();
        let guard = store.lock(key(1)).await;

        let mut waiting = Box::pin(store.lock(key(1)));
        assert!(futures::poll!(&mut waiting).is_pending());

        // Holder leaves while the waiter still holds a reference
        drop(guard);
        assert_eq!(store.locked_keys(), 1);

        drop(waiting);
        assert_eq!(store.locked_keys(), 0);
    }

    #[tokio::test]
    async fn test_lock_entry_survives_while_waited_on() {
        let store = Arc::new(ConversationStore::new());
        let guard = store.lock(key(1)).await;

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let _guard = store.lock(key(1)).await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(guard);
        assert_eq!(store.locked_keys(), 1);

        waiter.await.unwrap();
        assert_eq!(store.locked_keys(), 0);
    }
}
