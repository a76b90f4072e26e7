//! File-backed [`Storage`].
//!
//! Every key is stored as one JSON document holding the value and its e-tag:
//!
//! ```text
//! <directory>/
//! ├── test%2Fconversations%2Fconv1.json   {"value": {...}, "eTag": "6f1c…"}
//! └── test%2Fusers%2Fuser1.json
//! ```
//!
//! File names are the key with every byte outside `[A-Za-z0-9_-]`
//! percent-encoded, so distinct keys never share a file. Writes go to a
//! temporary file first and are renamed into place. One writer at a time is
//! admitted per store, so the e-tag check and the write of a batch are atomic
//! with respect to other writes through the same `FileStorage`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use colloquy_core::{
    BoxedStorage, MemoryStorage, Storage, StorageError, StorageResult, StoreItem, check_etag,
};
use tokio::sync::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::{StorageBackend, StorageConfig};

/// Opens the storage backend selected by `config`.
pub fn open_storage(config: &StorageConfig) -> BoxedStorage {
    match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::File => Arc::new(FileStorage::new(config.directory.clone())),
    }
}

/// A [`Storage`] keeping one JSON file per key under a directory.
#[derive(Debug)]
pub struct FileStorage {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Creates a store rooted at `directory`. The directory is created on
    /// first write.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the base directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the file holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.json", encode_key(key)))
    }

    async fn read_item(&self, key: &str) -> StorageResult<Option<StoreItem>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_item(&self, key: &str, item: &StoreItem) -> StorageResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        let bytes = serde_json::to_vec_pretty(item)?;

        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        trace!(key, path = %path.display(), "Wrote item");
        Ok(())
    }
}

/// Percent-encodes every byte outside `[A-Za-z0-9_-]`.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

#[async_trait]
impl Storage for FileStorage {
    async fn read(&self, keys: &[String]) -> StorageResult<HashMap<String, StoreItem>> {
        let mut items = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(item) = self.read_item(key).await? {
                items.insert(key.clone(), item);
            }
        }
        Ok(items)
    }

    async fn write(
        &self,
        changes: HashMap<String, StoreItem>,
    ) -> StorageResult<HashMap<String, String>> {
        let _guard = self.write_lock.lock().await;

        for (key, change) in &changes {
            let current = self.read_item(key).await?;
            check_etag(
                key,
                change.e_tag.as_deref(),
                current.as_ref().and_then(|item| item.e_tag.as_deref()),
            )?;
        }

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| {
                StorageError::Io(format!(
                    "cannot create {}: {e}",
                    self.directory.display()
                ))
            })?;

        let mut e_tags = HashMap::with_capacity(changes.len());
        for (key, change) in changes {
            let e_tag = Uuid::new_v4().simple().to_string();
            let item = StoreItem {
                value: change.value,
                e_tag: Some(e_tag.clone()),
            };
            self.write_item(&key, &item).await?;
            e_tags.insert(key, e_tag);
        }
        debug!(count = e_tags.len(), "Wrote batch");
        Ok(e_tags)
    }

    async fn delete(&self, keys: &[String]) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        for key in keys {
            match tokio::fs::remove_file(self.path_for(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
