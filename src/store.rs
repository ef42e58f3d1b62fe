//! Key-value store abstraction
//!
//! The durable, extension-scoped storage the repository sits on. Reads and
//! writes are async and may fail transiently; callers must not assume a
//! write is visible until they have read it back.

use crate::error::{GuardError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

/// Async key-value store holding JSON values
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value; `None` when the key has never been written
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Store name (e.g., "memory", "file")
    fn name(&self) -> &str;
}

/// In-memory store for tests and single-process use
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// JSON file-backed store
///
/// All keys live in a single JSON object on disk. Writes go to a temp
/// file and are renamed into place so a crash never leaves a torn file.
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Create a file store at the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self, key: &str) -> Result<Map<String, Value>> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(GuardError::store(
                    key,
                    format!("failed to read {}: {}", self.path.display(), e),
                ))
            }
        };

        match serde_json::from_str::<Value>(&json) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(GuardError::Document {
                key: key.to_string(),
                reason: format!("{} does not hold a JSON object", self.path.display()),
            }),
            Err(e) => Err(GuardError::Document {
                key: key.to_string(),
                reason: format!("failed to parse {}: {}", self.path.display(), e),
            }),
        }
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut map = self.load(key).await?;
        Ok(map.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut map = self.load(key).await?;
        map.insert(key.to_string(), value);
        let json = serde_json::to_string_pretty(&Value::Object(map))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                GuardError::store(
                    key,
                    format!("failed to create directory {}: {}", parent.display(), e),
                )
            })?;
        }

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, json).await.map_err(|e| {
            GuardError::store(key, format!("failed to write {}: {}", tmp_path.display(), e))
        })?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| {
            GuardError::store(
                key,
                format!(
                    "failed to rename {} → {}: {}",
                    tmp_path.display(),
                    self.path.display(),
                    e
                ),
            )
        })?;

        tracing::debug!(path = %self.path.display(), key, "Store value written");
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
