//! Local persistent key-value cache

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::StoreResult;

/// Key-value store of JSON documents that survives app restarts.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>>;

    async fn set(&self, key: &str, value: serde_json::Value) -> StoreResult<()>;

    /// Remove `key`; returns whether it was present.
    async fn remove(&self, key: &str) -> StoreResult<bool>;

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// In-memory cache for tests
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalCache for InMemoryCache {
    async fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> StoreResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    key: String,
    value: serde_json::Value,
}

/// Cache with one JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Open (and create if needed) a cache rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "File cache opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }

    async fn read_entry(path: &Path) -> StoreResult<Option<FileEntry>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

// Keys map to file names; anything outside [A-Za-z0-9_-] is escaped as `%XX`.
fn file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

#[async_trait]
impl LocalCache for FileCache {
    async fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        let entry = Self::read_entry(&self.path_for(key)).await?;
        Ok(entry.filter(|e| e.key == key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> StoreResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&FileEntry {
            key: key.to_string(),
            value,
        })?;
        // Write-then-rename so readers never see a torn file.
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_entry(&path).await {
                Ok(Some(entry)) if entry.key.starts_with(prefix) => keys.push(entry.key),
                Ok(_) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable cache file"),
            }
        }
        keys.sort();
        Ok(keys)
    }
}
