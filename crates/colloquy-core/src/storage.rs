//! Key/value persistence with optimistic concurrency.
//!
//! Every [`StoreItem`] carries an opaque e-tag. A write that supplies an
//! e-tag only succeeds while that tag still matches the stored one:
//!
//! | Supplied e-tag | Key exists | Outcome                         |
//! |----------------|------------|---------------------------------|
//! | `None` / `"*"` | any        | unconditional write             |
//! | `Some(t)`      | no         | written as a new key            |
//! | `Some(t)`      | tag == `t` | written, new e-tag returned     |
//! | `Some(t)`      | tag != `t` | [`StorageError::ETagConflict`]  |
//!
//! A conflict is retryable: the caller reloads, reapplies its change and
//! writes again. Nothing here ever silently overwrites a newer version.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::error::{StorageError, StorageResult};

/// The e-tag that disables the concurrency check.
pub const ANY_ETAG: &str = "*";

/// One stored value and its version tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreItem {
    /// The stored document.
    pub value: Value,
    /// Version tag; see the module docs for write semantics.
    #[serde(rename = "eTag", default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
}

impl StoreItem {
    /// Creates an item for an unconditional write.
    pub fn new(value: Value) -> Self {
        Self { value, e_tag: None }
    }

    /// Sets the e-tag the write is conditioned on.
    pub fn with_etag(mut self, e_tag: impl Into<String>) -> Self {
        self.e_tag = Some(e_tag.into());
        self
    }
}

/// A key/value store used for bot and dialog state.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Reads the given keys. Missing keys are absent from the result.
    async fn read(&self, keys: &[String]) -> StorageResult<HashMap<String, StoreItem>>;

    /// Writes a batch of items, returning the new e-tag of each key.
    ///
    /// The batch is checked before anything is written: on a conflict no
    /// key of the batch is modified.
    async fn write(
        &self,
        changes: HashMap<String, StoreItem>,
    ) -> StorageResult<HashMap<String, String>>;

    /// Deletes the given keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> StorageResult<()>;
}

/// A shared, type-erased storage.
pub type BoxedStorage = Arc<dyn Storage>;

/// Checks a supplied e-tag against the currently stored one.
///
/// Shared by every [`Storage`] implementation so they agree on the table in
/// the module docs.
pub fn check_etag(key: &str, supplied: Option<&str>, current: Option<&str>) -> StorageResult<()> {
    match (supplied, current) {
        (None, _) | (Some(ANY_ETAG), _) | (Some(_), None) => Ok(()),
        (Some(expected), Some(actual)) if expected == actual => Ok(()),
        (Some(expected), Some(actual)) => Err(StorageError::ETagConflict {
            key: key.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
    }
}

// =============================================================================
// MemoryStorage
// =============================================================================

/// A process-local [`Storage`] backed by a hash map.
///
/// E-tags are a monotonically increasing counter. Intended for tests and
/// single-process bots; contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, StoreItem>>,
    e_tag: AtomicU64,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read(&self, keys: &[String]) -> StorageResult<HashMap<String, StoreItem>> {
        let items = self.items.lock();
        Ok(keys
            .iter()
            .filter_map(|key| items.get(key).map(|item| (key.clone(), item.clone())))
            .collect())
    }

    async fn write(
        &self,
        changes: HashMap<String, StoreItem>,
    ) -> StorageResult<HashMap<String, String>> {
        let mut items = self.items.lock();

        for (key, change) in &changes {
            let current = items.get(key).and_then(|item| item.e_tag.as_deref());
            check_etag(key, change.e_tag.as_deref(), current)?;
        }

        let mut e_tags = HashMap::with_capacity(changes.len());
        for (key, change) in changes {
            let e_tag = (self.e_tag.fetch_add(1, Ordering::SeqCst) + 1).to_string();
            trace!(key = %key, e_tag = %e_tag, "Writing item");
            items.insert(
                key.clone(),
                StoreItem {
                    value: change.value,
                    e_tag: Some(e_tag.clone()),
                },
            );
            e_tags.insert(key, e_tag);
        }
        Ok(e_tags)
    }

    async fn delete(&self, keys: &[String]) -> StorageResult<()> {
        let mut items = self.items.lock();
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }
}
