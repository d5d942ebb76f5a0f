//! Session store
//!
//! Key/value store of JSON values shared by the capture side. Lives as long
//! as the browsing session; nothing here survives a restart unless the
//! file-backed store is used.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::fs;

use crate::error::Result;

/// Key/value storage of JSON values
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Replace the value stored under `key`
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Read a JSON object stored under `key`, empty if absent or not an object
pub async fn read_map(store: &dyn SessionStore, key: &str) -> Result<Map<String, Value>> {
    match store.get(key).await? {
        Some(Value::Object(map)) => Ok(map),
        _ => Ok(Map::new()),
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

// ============================================================================
// File-backed store
// ============================================================================

/// All keys in one pretty-printed JSON object on disk
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>> {
        match fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Map::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.write_lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.read_all().await?;
        all.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&Value::Object(all))?;
        fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySessionStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", json!({"7": "abc"})).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"7": "abc"})));
    }

    #[tokio::test]
    async fn test_read_map_ignores_non_objects() {
        let store = MemorySessionStore::new();
        store.set("k", json!([1, 2])).await.unwrap();
        assert!(read_map(&store, "k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session").join("store.json");

        let store = JsonFileStore::new(&path);
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", json!({"1": 2.5})).await.unwrap();
        store.set("other", json!(true)).await.unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("k").await.unwrap(), Some(json!({"1": 2.5})));
        assert_eq!(reopened.get("other").await.unwrap(), Some(json!(true)));
    }
}
