//! Fan-out over several backends
//!
//! Reads probe the backends in priority order (fast local ones first) and
//! return the first hit. Writes go to every backend concurrently and only
//! fail when every backend failed. Removes are best effort.

use super::StorageAdapter;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

pub struct MultiStorageAdapter {
    adapters: Vec<Arc<dyn StorageAdapter>>,
}

impl MultiStorageAdapter {
    /// Backends in read priority order
    pub fn new(adapters: Vec<Arc<dyn StorageAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[async_trait]
impl StorageAdapter for MultiStorageAdapter {
    fn name(&self) -> &str {
        "multi"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        for adapter in &self.adapters {
            match adapter.get(key).await {
                Ok(Some(value)) => {
                    tracing::debug!("Read {} from {} storage", key, adapter.name());
                    return Ok(Some(value));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Error reading {} from {} storage: {}", key, adapter.name(), e);
                }
            }
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.adapters.is_empty() {
            return Err(AppError::Storage(format!(
                "No storage backends configured to write {}",
                key
            )));
        }

        let results = join_all(self.adapters.iter().map(|a| a.set(key, value))).await;

        let mut failed = 0;
        for (adapter, result) in self.adapters.iter().zip(&results) {
            if let Err(e) = result {
                failed += 1;
                tracing::warn!("Error writing {} to {} storage: {}", key, adapter.name(), e);
            }
        }

        if failed == self.adapters.len() {
            tracing::error!("All storage backends failed to write {}", key);
            return Err(AppError::Storage(format!(
                "All storage backends failed to write {}",
                key
            )));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let results = join_all(self.adapters.iter().map(|a| a.remove(key))).await;

        for (adapter, result) in self.adapters.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("Error removing {} from {} storage: {}", key, adapter.name(), e);
            }
        }
        Ok(())
    }
}
