//! Persistent key-value store used as the record cache.
//!
//! Records are JSON objects grouped into named collections and keyed by their
//! `"id"` field. Every operation is async and may fail with
//! [`StorageError::Unavailable`]; callers decide whether that is fatal.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StorageError;

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

/// Collection holding one `SecurityRecord` per security.
pub const RECORDS: &str = "security-records";
/// Collection holding the user's watchlist entries.
pub const WATCHLIST: &str = "watchlist";

/// Backend trait for the record cache.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StorageError>;

    /// Insert or replace `record`, keyed by its `"id"` string field.
    async fn put(&self, collection: &str, record: Value) -> Result<(), StorageError>;

    /// Remove one record. Deleting a missing id is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError>;

    async fn clear(&self, collection: &str) -> Result<(), StorageError>;

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, StorageError>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}

/// Extract the `"id"` key of a record.
pub(crate) fn record_id<'a>(collection: &str, record: &'a Value) -> Result<&'a str, StorageError> {
    record
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StorageError::MissingKey(collection.to_string()))
}

/// Fetch and deserialize one record.
pub async fn load<T: DeserializeOwned>(
    store: &dyn KvStore,
    collection: &str,
    id: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(collection, id).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and store one record.
pub async fn save<T: Serialize + Sync>(store: &dyn KvStore, collection: &str, record: &T) -> Result<(), StorageError> {
    let value = serde_json::to_value(record)?;
    store.put(collection, value).await
}

/// Fetch and deserialize every record of a collection.
pub async fn load_all<T: DeserializeOwned>(store: &dyn KvStore, collection: &str) -> Result<Vec<T>, StorageError> {
    store
        .get_all(collection)
        .await?
        .into_iter()
        .map(|value| serde_json::from_value(value).map_err(StorageError::from))
        .collect()
}
