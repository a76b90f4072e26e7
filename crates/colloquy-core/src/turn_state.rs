//! Per-turn service bag.
//!
//! [`TurnState`] is how pipeline stages hand computed values (a recognized
//! intent, a loaded state cache, a telemetry client) to later stages and to
//! dialog steps without widening every signature. It is owned by the
//! [`TurnContext`](crate::TurnContext) and dropped with it; nothing here is
//! process-global.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

type Entry = Arc<dyn Any + Send + Sync>;

/// A string-keyed map of heterogeneous values scoped to one turn.
#[derive(Default)]
pub struct TurnState {
    entries: Mutex<HashMap<String, Entry>>,
}

impl TurnState {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value under `key`, replacing any previous value.
    pub fn insert<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.entries.lock().insert(key.into(), Arc::new(value));
    }

    /// Stores an already shared value under `key`.
    pub fn insert_arc<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: Arc<T>) {
        self.entries.lock().insert(key.into(), value);
    }

    /// Returns a clone of the value under `key` if it exists and has type `T`.
    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.entries
            .lock()
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Returns the shared value under `key` if it exists and has type `T`.
    pub fn get_arc<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let entry = self.entries.lock().get(key).cloned()?;
        entry.downcast::<T>().ok()
    }

    /// Returns `true` if any value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Removes the value under `key`, returning whether one was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Stores a value keyed by its type name.
    pub fn insert_typed<T: Send + Sync + 'static>(&self, value: T) {
        self.insert(type_name::<T>(), value);
    }

    /// Returns a clone of the value stored by [`insert_typed`](Self::insert_typed).
    pub fn get_typed<T: Clone + 'static>(&self) -> Option<T> {
        self.get(type_name::<T>())
    }

    /// Returns the keys currently stored.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

impl std::fmt::Debug for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnState")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Intent(String);

    #[test]
    fn test_typed_roundtrip() {
        let state = TurnState::new();
        state.insert_typed(Intent("greet".into()));
        assert_eq!(state.get_typed::<Intent>(), Some(Intent("greet".into())));
    }

    #[test]
    fn test_type_mismatch_returns_none() {
        let state = TurnState::new();
        state.insert("count", 3_u32);
        assert_eq!(state.get::<u32>("count"), Some(3));
        assert_eq!(state.get::<String>("count"), None);
        assert!(state.get_arc::<String>("count").is_none());
    }

    #[test]
    fn test_remove() {
        let state = TurnState::new();
        state.insert("k", "v".to_string());
        assert!(state.contains("k"));
        assert!(state.remove("k"));
        assert!(!state.remove("k"));
    }
}
