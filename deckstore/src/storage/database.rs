//! SQLite-backed storage
//!
//! Structured local backend over the `state_store` table. The pool is opened
//! lazily on first use; if opening fails the error is logged and the call
//! degrades to a miss, and the next call tries again.

use super::StorageAdapter;
use crate::database::{create_pool, Repository};
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

/// Default database file inside the data directory
pub const DATABASE_FILE: &str = "deckstore.db";

pub struct DatabaseStorageAdapter {
    db_path: PathBuf,
    repo: OnceCell<Repository>,
}

impl DatabaseStorageAdapter {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            repo: OnceCell::new(),
        }
    }

    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(DATABASE_FILE))
    }

    async fn repo(&self) -> Option<&Repository> {
        let opened = self
            .repo
            .get_or_try_init(|| async { create_pool(&self.db_path).await.map(Repository::new) })
            .await;

        match opened {
            Ok(repo) => Some(repo),
            Err(e) => {
                tracing::error!("Error opening database at {:?}: {}", self.db_path, e);
                None
            }
        }
    }
}

#[async_trait]
impl StorageAdapter for DatabaseStorageAdapter {
    fn name(&self) -> &str {
        "database"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(repo) = self.repo().await else {
            return Ok(None);
        };
        match repo.get_value(key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::error!("Error reading {} from database: {}", key, e);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let Some(repo) = self.repo().await else {
            return Ok(());
        };
        if let Err(e) = repo.set_value(key, value).await {
            tracing::error!("Error writing {} to database: {}", key, e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let Some(repo) = self.repo().await else {
            return Ok(());
        };
        if let Err(e) = repo.remove_value(key).await {
            tracing::error!("Error removing {} from database: {}", key, e);
        }
        Ok(())
    }
}
