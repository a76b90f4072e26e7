//! Per-conversation turn serialization.
//!
//! Two turns of the same conversation must not interleave their
//! load/modify/save of conversation state. [`ConversationLocks`] hands out
//! one async mutex per conversation key; turns of different conversations
//! never contend. Entries are dropped from the registry as soon as no turn
//! holds or waits for them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::trace;

type Registry = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// A keyed registry of async locks.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    registry: Arc<Registry>,
}

impl ConversationLocks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other turn holds `key`, then holds it until the
    /// returned guard is dropped.
    ///
    /// If this future is dropped while waiting after the holder already
    /// released the key, the idle entry stays registered until the next
    /// guard for the same key is dropped.
    pub async fn acquire(&self, key: &str) -> ConversationGuard {
        let lock = {
            let mut registry = self.registry.lock();
            Arc::clone(registry.entry(key.to_string()).or_default())
        };

        let guard = lock.lock_owned().await;
        trace!(key, "Conversation lock acquired");
        ConversationGuard {
            guard: Some(guard),
            key: key.to_string(),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Returns the number of conversations currently locked or waited on.
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    /// Returns `true` if no conversation is locked.
    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }
}

impl std::fmt::Debug for ConversationLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLocks")
            .field("active", &self.len())
            .finish()
    }
}

/// Holds one conversation's lock.
pub struct ConversationGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    registry: Arc<Registry>,
}

impl ConversationGuard {
    /// Returns the locked conversation key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        self.guard.take();

        // Only the registry still references the lock: nobody holds or waits.
        let mut registry = self.registry.lock();
        if registry
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            registry.remove(&self.key);
            trace!(key = %self.key, "Conversation lock pruned");
        }
    }
}

impl std::fmt::Debug for ConversationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationGuard")
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = ConversationLocks::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = locks.acquire("test/c1").await;

        let waiter = {
            let locks = locks.clone();
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                let _guard = locks.acquire("test/c1").await;
                order.lock().push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().push("first");
        drop(first);

        waiter.await.unwrap();
        assert_eq!(*order.lock(), ["first", "second"]);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_contend() {
        let locks = ConversationLocks::new();
        let _a = locks.acquire("test/a").await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire("test/b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_pin_entry() {
        let locks = ConversationLocks::new();
        let held = locks.acquire("test/c1").await;

        let waited =
            tokio::time::timeout(Duration::from_millis(20), locks.acquire("test/c1")).await;
        assert!(waited.is_err());
        assert_eq!(locks.len(), 1);

        drop(held);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = ConversationLocks::new();
        {
            let guard = locks.acquire("test/c1").await;
            assert_eq!(guard.key(), "test/c1");
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
