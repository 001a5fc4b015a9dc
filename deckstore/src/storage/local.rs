//! File-backed local storage
//!
//! All keys live in one JSON object on disk, loaded on first use and
//! rewritten atomically (temp file, fsync, rename) on every change.
//!
//! Failures are logged and swallowed: a read error yields `None`, a write
//! error leaves the in-memory copy updated so the session keeps working.

use super::StorageAdapter;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Default file name inside the data directory
pub const LOCAL_STORAGE_FILE: &str = "local_storage.json";

pub struct LocalStorageAdapter {
    path: PathBuf,
    entries: Mutex<Option<HashMap<String, String>>>,
}

impl LocalStorageAdapter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            entries: Mutex::new(None),
        }
    }

    /// Adapter using the default file inside `data_dir`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(LOCAL_STORAGE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> HashMap<String, String> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                tracing::error!("Error reading local storage {:?}: {}", self.path, e);
                return HashMap::new();
            }
        };

        match serde_json::from_str(&text) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Local storage {:?} is not valid JSON, starting empty: {}", self.path, e);
                HashMap::new()
            }
        }
    }

    async fn flush(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_vec(entries)?;
        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;

        fs::rename(temp_path, &self.path).await?;
        Ok(())
    }

    /// Apply `edit` to the cached map and write the result to disk
    async fn write_with<F>(&self, key: &str, edit: F)
    where
        F: FnOnce(&mut HashMap<String, String>),
    {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await);
        }
        let Some(entries) = guard.as_mut() else {
            return;
        };
        edit(entries);

        if let Err(e) = self.flush(entries).await {
            tracing::error!("Error writing {} to local storage: {}", key, e);
        }
    }
}

#[async_trait]
impl StorageAdapter for LocalStorageAdapter {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await);
        }
        Ok(guard.as_ref().and_then(|entries| entries.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write_with(key, |entries| {
            entries.insert(key.to_string(), value.to_string());
        })
        .await;
        tracing::debug!("Local storage set {}", key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.write_with(key, |entries| {
            entries.remove(key);
        })
        .await;
        tracing::debug!("Local storage removed {}", key);
        Ok(())
    }
}
