// =============================================================================
// JSON-directory KvStore — one file per record
// =============================================================================
//
// Layout: `{root}/{collection}/{id}.json`. Writes use the same atomic
// tmp + rename pattern as the config file, so a crash mid-write never leaves
// a half-written record behind. Ids are escaped into file names reversibly:
// ASCII letters, digits and `-` pass through, every other byte becomes `_XX`
// (upper-case hex), so distinct ids never share a file.
// =============================================================================

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{record_id, KvStore};
use crate::error::StorageError;

pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(file_stem(collection))
    }

    fn record_path(&self, collection: &str, id: &str) -> PathBuf {
        self.collection_dir(collection).join(format!("{}.json", file_stem(id)))
    }
}

fn file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{byte:02X}"));
        }
    }
    stem
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StorageError> {
        let path = self.record_path(collection, id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Unavailable(format!("{}: {e}", path.display()))),
        }
    }

    async fn put(&self, collection: &str, record: Value) -> Result<(), StorageError> {
        let id = record_id(collection, &record)?;
        let path = self.record_path(collection, id);
        let content = serde_json::to_vec(&record)?;

        tokio::fs::create_dir_all(self.collection_dir(collection)).await?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(collection, id, bytes = content.len(), "record written");
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.record_path(collection, id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, collection: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_dir_all(self.collection_dir(collection)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, StorageError> {
        let dir = self.collection_dir(collection);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice(&bytes) {
                Ok(value) => records.push(value),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }
        Ok(records)
    }

    fn backend_type(&self) -> &'static str {
        "json-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.put("records", json!({"id": "2330", "close": 1.5})).await.unwrap();
        store.put("records", json!({"id": "2317", "close": 2.5})).await.unwrap();

        let reopened = JsonFileStore::new(dir.path());
        assert_eq!(
            reopened.get("records", "2330").await.unwrap(),
            Some(json!({"id": "2330", "close": 1.5}))
        );
        let all = reopened.get_all("records").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["id"], "2317");
        assert!(!dir.path().join("records").join("2330.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_records_and_collections_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert_eq!(store.get("none", "x").await.unwrap(), None);
        assert!(store.get_all("none").await.unwrap().is_empty());
        store.delete("none", "x").await.unwrap();
        store.clear("none").await.unwrap();
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.put("w", json!({"id": "a"})).await.unwrap();
        store.put("w", json!({"id": "b"})).await.unwrap();
        store.delete("w", "a").await.unwrap();
        assert_eq!(store.get_all("w").await.unwrap(), vec![json!({"id": "b"})]);
        store.clear("w").await.unwrap();
        assert!(store.get_all("w").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ids_are_escaped_into_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.put("w", json!({"id": "../evil"})).await.unwrap();
        assert!(dir.path().join("w").join("_2E_2E_2Fevil.json").exists());
        assert_eq!(store.get("w", "../evil").await.unwrap(), Some(json!({"id": "../evil"})));
    }

    #[tokio::test]
    async fn ids_differing_in_punctuation_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.put("w", json!({"id": "A.B", "n": 1})).await.unwrap();
        store.put("w", json!({"id": "A_B", "n": 2})).await.unwrap();
        store.put("w", json!({"id": "A_2EB", "n": 3})).await.unwrap();

        assert_eq!(store.get("w", "A.B").await.unwrap(), Some(json!({"id": "A.B", "n": 1})));
        assert_eq!(store.get("w", "A_B").await.unwrap(), Some(json!({"id": "A_B", "n": 2})));
        assert_eq!(store.get("w", "A_2EB").await.unwrap(), Some(json!({"id": "A_2EB", "n": 3})));
        assert_eq!(store.get_all("w").await.unwrap().len(), 3);
    }

    #[test]
    fn file_stems_are_reversible_escapes() {
        assert_eq!(file_stem("2330"), "2330");
        assert_eq!(file_stem("BRK-B"), "BRK-B");
        assert_eq!(file_stem("A_B"), "A_5FB");
        assert_eq!(file_stem("A.B"), "A_2EB");
    }

    #[tokio::test]
    async fn unwritable_root_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let store = JsonFileStore::new(&file);
        let err = store.put("w", json!({"id": "a"})).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }
}
