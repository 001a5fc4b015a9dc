//! Remote storage backend
//!
//! Key/value rows in a PostgREST table (`presentation_store` by default),
//! scoped to the signed-in user. Rows are keyed by `(name, user_id)` and
//! written with an upsert.
//!
//! Without a user every call is a logged no-op. Transport and HTTP failures
//! are returned to the caller.

use super::StorageAdapter;
use crate::config::REMOTE_STORE_TABLE;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct StoreRow<'a> {
    name: &'a str,
    value: &'a str,
    user_id: &'a str,
    updated_at: String,
}

#[derive(Debug, Deserialize)]
struct ValueRow {
    value: Option<String>,
}

pub struct RemoteStorageAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    table: String,
    user_id: RwLock<Option<String>>,
}

impl RemoteStorageAdapter {
    pub fn new(base_url: &str, api_key: &str, user_id: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("deckstore/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            table: REMOTE_STORE_TABLE.to_string(),
            user_id: RwLock::new(user_id),
        })
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    /// Switch the signed-in user; `None` signs out
    pub async fn set_user(&self, user_id: Option<String>) {
        *self.user_id.write().await = user_id;
    }

    fn endpoint(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    async fn current_user(&self, action: &str) -> Option<String> {
        let user = self.user_id.read().await.clone();
        if user.is_none() {
            tracing::warn!("Cannot {} remote storage: no user signed in", action);
        }
        user
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.endpoint())
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn check_status(response: &reqwest::Response, key: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        tracing::warn!("Remote storage returned status {} for {}", status, key);
        Err(AppError::Storage(format!(
            "Remote storage returned status {} for {}",
            status, key
        )))
    }
}

#[async_trait]
impl StorageAdapter for RemoteStorageAdapter {
    fn name(&self) -> &str {
        "remote"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(user_id) = self.current_user("read from").await else {
            return Ok(None);
        };

        let response = self
            .request(reqwest::Method::GET)
            .query(&[
                ("select", "value".to_string()),
                ("name", format!("eq.{}", key)),
                ("user_id", format!("eq.{}", user_id)),
                ("limit", "1".to_string()),
            ])
            .send()
            .await?;
        Self::check_status(&response, key)?;

        let rows: Vec<ValueRow> = response.json().await?;
        tracing::debug!("Remote storage get {} ({} rows)", key, rows.len());
        Ok(rows.into_iter().next().and_then(|row| row.value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let Some(user_id) = self.current_user("write to").await else {
            return Ok(());
        };

        let row = StoreRow {
            name: key,
            value,
            user_id: &user_id,
            updated_at: Utc::now().to_rfc3339(),
        };
        let response = self
            .request(reqwest::Method::POST)
            .query(&[("on_conflict", "name,user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row)
            .send()
            .await?;
        Self::check_status(&response, key)?;

        tracing::debug!("Remote storage set {}", key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let Some(user_id) = self.current_user("remove from").await else {
            return Ok(());
        };

        let response = self
            .request(reqwest::Method::DELETE)
            .query(&[
                ("name", format!("eq.{}", key)),
                ("user_id", format!("eq.{}", user_id)),
            ])
            .send()
            .await?;
        Self::check_status(&response, key)?;

        tracing::debug!("Remote storage removed {}", key);
        Ok(())
    }
}
