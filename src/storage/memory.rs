// =============================================================================
// In-memory KvStore
// =============================================================================
//
// Backing store for tests and for running without a cache directory. It can
// be switched offline to simulate an unavailable store.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{record_id, KvStore};
use crate::error::StorageError;

pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// While offline every operation fails with `StorageError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self, collection: &str) -> usize {
        self.collections.read().get(collection).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory store is offline".to_string()))
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StorageError> {
        self.check()?;
        Ok(self.collections.read().get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn put(&self, collection: &str, record: Value) -> Result<(), StorageError> {
        self.check()?;
        let id = record_id(collection, &record)?.to_string();
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id, record);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError> {
        self.check()?;
        if let Some(c) = self.collections.write().get_mut(collection) {
            c.remove(id);
        }
        Ok(())
    }

    async fn clear(&self, collection: &str) -> Result<(), StorageError> {
        self.check()?;
        self.collections.write().remove(collection);
        Ok(())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, StorageError> {
        self.check()?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
