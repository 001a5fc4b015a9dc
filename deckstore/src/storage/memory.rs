//! In-memory storage backend.
//!
//! Holds everything in a HashMap behind an RwLock; all data is lost when the
//! adapter is dropped. Used for ephemeral sessions and in tests.

use super::StorageAdapter;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
pub struct MemoryStorageAdapter {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
