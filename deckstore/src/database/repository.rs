//! Repository layer for database operations
//!
//! Key/value rows of the `state_store` table.

use crate::error::Result;
use chrono::Utc;
use sqlx::SqlitePool;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM state_store WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }

    /// Insert or overwrite a value
    pub async fn set_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO state_store (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!("Stored {} ({} bytes)", key, value.len());
        Ok(())
    }

    pub async fn remove_value(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM state_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        tracing::debug!("Removed {}", key);
        Ok(())
    }
}
