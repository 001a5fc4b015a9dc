//! Enhanced persistence
//!
//! Versioned, checksummed snapshots of the persisted store state, a bounded
//! version history per presentation, and one-shot crash-recovery points.
//!
//! Storage layout for a store named `<name>`:
//! - `<name>`: the latest `VersionedData` envelope of the whole state
//! - `<name>_versions_<presentation id>`: JSON array of `PresentationVersion`
//! - `<name>_recovery_<presentation id>`: one recovery envelope
//!
//! Nothing here propagates storage failures except `restore_version`, whose
//! caller asked for a specific version and needs to know it was missing.

pub mod throttle;

pub use throttle::{spawn_persistence_worker, PersistenceHandle};

use crate::config::{
    AppConfig, DEFAULT_AUTO_SAVE_INTERVAL_MS, DEFAULT_MAX_VERSIONS, DEFAULT_STORE_NAME,
    DEFAULT_THROTTLE_MS, STORE_SCHEMA_VERSION,
};
use crate::error::{AppError, Result};
use crate::integrity::{validate_data_integrity, VersionedData};
use crate::storage::StorageAdapter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct PersistOptions {
    pub name: String,
    pub version: u32,
    pub throttle: Duration,
    pub max_versions_to_keep: usize,
    pub enable_versioning: bool,
    pub enable_crash_recovery: bool,
    /// `None` disables the auto-save timer
    pub auto_save_interval: Option<Duration>,
    pub integrity_check: bool,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_STORE_NAME.to_string(),
            version: STORE_SCHEMA_VERSION,
            throttle: Duration::from_millis(DEFAULT_THROTTLE_MS),
            max_versions_to_keep: DEFAULT_MAX_VERSIONS,
            enable_versioning: true,
            enable_crash_recovery: true,
            auto_save_interval: Some(Duration::from_millis(DEFAULT_AUTO_SAVE_INTERVAL_MS)),
            integrity_check: true,
        }
    }
}

impl PersistOptions {
    /// Options for the application store
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            throttle: config.throttle,
            max_versions_to_keep: config.max_versions,
            auto_save_interval: config.auto_save_interval,
            ..Self::default()
        }
    }
}

/// One entry in a presentation's version history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationVersion {
    pub id: String,
    pub presentation_id: String,
    pub data: Value,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub is_autosave: bool,
    pub is_recovery_point: bool,
}

pub struct EnhancedPersistence {
    adapter: Arc<dyn StorageAdapter>,
    options: PersistOptions,
    history: Mutex<HashMap<String, Vec<PresentationVersion>>>,
    // Serializes load -> append -> write of version arrays
    versions_lock: Mutex<()>,
}

impl EnhancedPersistence {
    pub fn new(adapter: Arc<dyn StorageAdapter>, options: PersistOptions) -> Self {
        Self {
            adapter,
            options,
            history: Mutex::new(HashMap::new()),
            versions_lock: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &PersistOptions {
        &self.options
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    pub fn root_key(&self) -> String {
        self.options.name.clone()
    }

    pub fn versions_key(&self, presentation_id: &str) -> String {
        format!("{}_versions_{}", self.options.name, presentation_id)
    }

    pub fn recovery_key(&self, presentation_id: &str) -> String {
        format!("{}_recovery_{}", self.options.name, presentation_id)
    }

    /// Throttled-save body: write the root envelope, then append an
    /// autosave version when a presentation is active
    pub async fn save_snapshot(&self, state: &Value, presentation_id: Option<&str>) {
        let envelope = VersionedData::new(state.clone(), self.options.version);

        match serde_json::to_string(&envelope) {
            Ok(text) => {
                if let Err(e) = self.adapter.set(&self.root_key(), &text).await {
                    tracing::error!("Error persisting state: {}", e);
                    return;
                }
            }
            Err(e) => {
                tracing::error!("Error serializing state: {}", e);
                return;
            }
        }

        let pid = presentation_id.filter(|_| self.options.enable_versioning);
        if let Some(pid) = pid {
            let version = PresentationVersion {
                id: envelope.id.clone(),
                presentation_id: pid.to_string(),
                data: envelope.data,
                version: envelope.version,
                timestamp: envelope.timestamp,
                description: "Auto-saved version".to_string(),
                is_autosave: true,
                is_recovery_point: false,
            };
            self.append_version(pid, version).await;
        }

        tracing::debug!("State persisted ({})", envelope.id);
    }

    /// Write an out-of-band recovery snapshot and record it in the history
    pub async fn create_recovery_point(&self, state: &Value, presentation_id: &str, description: &str) {
        if !self.options.enable_crash_recovery {
            return;
        }

        let envelope = VersionedData::new(state.clone(), self.options.version);
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Error serializing recovery point: {}", e);
                return;
            }
        };
        if let Err(e) = self.adapter.set(&self.recovery_key(presentation_id), &text).await {
            tracing::error!("Error creating recovery point: {}", e);
            return;
        }

        if self.options.enable_versioning {
            let description = if description.is_empty() {
                "Recovery point"
            } else {
                description
            };
            let version = PresentationVersion {
                id: envelope.id,
                presentation_id: presentation_id.to_string(),
                data: envelope.data,
                version: envelope.version,
                timestamp: envelope.timestamp,
                description: description.to_string(),
                is_autosave: false,
                is_recovery_point: true,
            };
            self.append_version(presentation_id, version).await;
        }

        tracing::info!("Recovery point created for {}: {}", presentation_id, description);
    }

    /// Load a presentation's history from storage, replacing the cached copy
    pub async fn load_version_history(&self, presentation_id: &str) -> Vec<PresentationVersion> {
        let _guard = self.versions_lock.lock().await;
        self.read_version_history(presentation_id).await
    }

    async fn read_version_history(&self, presentation_id: &str) -> Vec<PresentationVersion> {
        let versions = match self.adapter.get(&self.versions_key(presentation_id)).await {
            Ok(Some(text)) => match serde_json::from_str::<Vec<PresentationVersion>>(&text) {
                Ok(versions) => versions,
                Err(e) => {
                    tracing::error!("Error parsing version history for {}: {}", presentation_id, e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!("Error loading version history for {}: {}", presentation_id, e);
                return Vec::new();
            }
        };

        self.history
            .lock()
            .await
            .insert(presentation_id.to_string(), versions.clone());
        versions
    }

    /// Look up a version and return its data.
    ///
    /// `current` is snapshotted as a "Pre-restore backup" recovery point
    /// first, so the restore itself can be undone.
    pub async fn restore_version(
        &self,
        version_id: &str,
        presentation_id: &str,
        current: &Value,
    ) -> Result<Value> {
        let cached = self.history.lock().await.get(presentation_id).cloned();
        let versions = match cached {
            Some(versions) => versions,
            None => self.load_version_history(presentation_id).await,
        };

        let Some(version) = versions.into_iter().find(|v| v.id == version_id) else {
            tracing::error!("Error restoring version: {} not found", version_id);
            return Err(AppError::VersionNotFound(version_id.to_string()));
        };

        self.create_recovery_point(current, presentation_id, "Pre-restore backup")
            .await;

        tracing::info!("Restoring version {} of {}", version_id, presentation_id);
        Ok(version.data)
    }

    /// Recovered state for a presentation, if a trustworthy one exists.
    ///
    /// Recovery is one-shot: a snapshot that is handed out is deleted.
    pub async fn check_for_crash(&self, presentation_id: &str) -> Option<Value> {
        if !self.options.enable_crash_recovery {
            return None;
        }

        let key = self.recovery_key(presentation_id);
        let text = match self.adapter.get(&key).await {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!("Error checking for crash: {}", e);
                return None;
            }
        };

        let envelope: VersionedData<Value> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!("Recovery data for {} is unreadable: {}", presentation_id, e);
                return None;
            }
        };

        if self.options.integrity_check && !validate_data_integrity(&envelope) {
            tracing::error!("Recovery data for {} failed integrity check", presentation_id);
            return None;
        }

        if let Err(e) = self.adapter.remove(&key).await {
            tracing::warn!("Error removing consumed recovery data: {}", e);
        }

        tracing::info!("Found recovery data for presentation {}", presentation_id);
        Some(envelope.data)
    }

    /// Load the root envelope written by a previous session.
    ///
    /// Returns `None` when nothing was stored or the envelope is not
    /// trustworthy. Also loads the version history of the presentation that
    /// was current when the snapshot was taken.
    pub async fn rehydrate(&self) -> Option<Value> {
        let text = match self.adapter.get(&self.root_key()).await {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!("Error rehydrating store: {}", e);
                return None;
            }
        };

        let envelope: VersionedData<Value> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!("Error rehydrating store: {}", e);
                return None;
            }
        };

        if self.options.integrity_check && !validate_data_integrity(&envelope) {
            tracing::error!("Persisted state failed integrity check, ignoring it");
            return None;
        }

        let data = self.migrate(envelope.data, envelope.version);

        if let Some(pid) = data.get("currentPresentationId").and_then(Value::as_str) {
            self.load_version_history(pid).await;
        }

        tracing::info!("Store rehydrated successfully");
        Some(data)
    }

    /// Upgrade a persisted payload to the current schema version
    fn migrate(&self, data: Value, from_version: u32) -> Value {
        if from_version != self.options.version {
            tracing::info!(
                "Migrating persisted state from version {} to {}",
                from_version,
                self.options.version
            );
        }
        data
    }

    async fn append_version(&self, presentation_id: &str, version: PresentationVersion) {
        let _guard = self.versions_lock.lock().await;

        let loaded = self.history.lock().await.contains_key(presentation_id);
        if !loaded {
            self.read_version_history(presentation_id).await;
        }

        let versions = {
            let mut history = self.history.lock().await;
            let versions = history.entry(presentation_id.to_string()).or_default();
            versions.push(version);
            while versions.len() > self.options.max_versions_to_keep {
                // Earliest timestamp goes first; ties fall to the older entry
                let Some(oldest) = versions
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, v)| v.timestamp)
                    .map(|(i, _)| i)
                else {
                    break;
                };
                versions.remove(oldest);
            }
            versions.clone()
        };

        let text = match serde_json::to_string(&versions) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Error serializing version history: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .adapter
            .set(&self.versions_key(presentation_id), &text)
            .await
        {
            tracing::error!("Error persisting version history for {}: {}", presentation_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::generate_checksum;
    use crate::storage::MemoryStorageAdapter;
    use serde_json::json;

    fn persistence(options: PersistOptions) -> (EnhancedPersistence, MemoryStorageAdapter) {
        let storage = MemoryStorageAdapter::new();
        (
            EnhancedPersistence::new(Arc::new(storage.clone()), options),
            storage,
        )
    }

    /// Memory backend with artificial I/O latency
    struct SlowStorage {
        inner: MemoryStorageAdapter,
        get_delay: Duration,
        set_delay: Duration,
    }

    #[async_trait::async_trait]
    impl StorageAdapter for SlowStorage {
        fn name(&self) -> &str {
            "slow"
        }

        async fn get(&self, key: &str) -> Result<Option<String>> {
            tokio::time::sleep(self.get_delay).await;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            tokio::time::sleep(self.set_delay).await;
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }
    }

    fn state(pid: &str, title: &str) -> Value {
        json!({
            "presentations": {pid: {"id": pid, "title": title}},
            "currentPresentationId": pid
        })
    }

    #[tokio::test]
    async fn test_save_writes_envelope_and_version() {
        let (p, storage) = persistence(PersistOptions::default());

        p.save_snapshot(&state("a", "Dogs"), Some("a")).await;

        let root = storage.get(DEFAULT_STORE_NAME).await.unwrap().unwrap();
        let envelope: VersionedData<Value> = serde_json::from_str(&root).unwrap();
        assert!(validate_data_integrity(&envelope));
        assert_eq!(envelope.version, STORE_SCHEMA_VERSION);

        let versions = p.load_version_history("a").await;
        assert_eq!(versions.len(), 1);
        assert!(versions[0].is_autosave);
        assert_eq!(versions[0].id, envelope.id);
    }

    #[tokio::test]
    async fn test_save_without_presentation_skips_versions() {
        let (p, storage) = persistence(PersistOptions::default());

        p.save_snapshot(&json!({"presentations": {}}), None).await;

        assert!(storage.get(DEFAULT_STORE_NAME).await.unwrap().is_some());
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_history_is_pruned_oldest_first() {
        let (p, _storage) = persistence(PersistOptions {
            max_versions_to_keep: 3,
            ..Default::default()
        });

        for i in 0..5 {
            p.save_snapshot(&state("a", &format!("v{}", i)), Some("a")).await;
        }

        let versions = p.load_version_history("a").await;
        assert_eq!(versions.len(), 3);
        let titles: Vec<&str> = versions
            .iter()
            .map(|v| v.data["presentations"]["a"]["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["v2", "v3", "v4"]);
    }

    #[tokio::test]
    async fn test_history_survives_restart() {
        let storage = MemoryStorageAdapter::new();
        let first = EnhancedPersistence::new(Arc::new(storage.clone()), PersistOptions::default());
        first.save_snapshot(&state("a", "one"), Some("a")).await;

        // A fresh instance must append to, not overwrite, the stored history
        let second = EnhancedPersistence::new(Arc::new(storage.clone()), PersistOptions::default());
        second.save_snapshot(&state("a", "two"), Some("a")).await;

        assert_eq!(second.load_version_history("a").await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_appends_keep_every_version() {
        let storage = MemoryStorageAdapter::new();
        let slow = SlowStorage {
            inner: storage.clone(),
            get_delay: Duration::from_millis(10),
            set_delay: Duration::from_millis(50),
        };
        let p = EnhancedPersistence::new(Arc::new(slow), PersistOptions::default());
        let snapshot = state("a", "Dogs");

        tokio::join!(
            p.save_snapshot(&snapshot, Some("a")),
            p.create_recovery_point(&snapshot, "a", "checkpoint"),
        );

        let fresh = EnhancedPersistence::new(Arc::new(storage), PersistOptions::default());
        let versions = fresh.load_version_history("a").await;
        assert_eq!(versions.len(), 2);
        assert!(versions.iter().any(|v| v.is_autosave));
        assert!(versions
            .iter()
            .any(|v| v.is_recovery_point && v.description == "checkpoint"));
    }

    #[tokio::test]
    async fn test_recovery_point_round_trip() {
        let (p, storage) = persistence(PersistOptions::default());

        p.create_recovery_point(&state("a", "Dogs"), "a", "Before migration")
            .await;
        let versions = p.load_version_history("a").await;
        assert!(versions[0].is_recovery_point);
        assert_eq!(versions[0].description, "Before migration");

        let recovered = p.check_for_crash("a").await.unwrap();
        assert_eq!(recovered["presentations"]["a"]["title"], "Dogs");

        // One-shot
        assert!(storage.get(&p.recovery_key("a")).await.unwrap().is_none());
        assert!(p.check_for_crash("a").await.is_none());
    }

    #[tokio::test]
    async fn test_check_for_crash_rejects_corruption() {
        let (p, storage) = persistence(PersistOptions::default());

        assert!(p.check_for_crash("a").await.is_none());

        let mut envelope = VersionedData::new(state("a", "Dogs"), 1);
        envelope.data["presentations"]["a"]["title"] = json!("Cats");
        storage
            .set(&p.recovery_key("a"), &serde_json::to_string(&envelope).unwrap())
            .await
            .unwrap();

        assert!(p.check_for_crash("a").await.is_none());
    }

    #[tokio::test]
    async fn test_crash_recovery_disabled() {
        let (p, storage) = persistence(PersistOptions {
            enable_crash_recovery: false,
            ..Default::default()
        });

        p.create_recovery_point(&state("a", "Dogs"), "a", "x").await;
        assert!(storage.is_empty().await);
        assert!(p.check_for_crash("a").await.is_none());
    }

    #[tokio::test]
    async fn test_restore_version() {
        let (p, _storage) = persistence(PersistOptions::default());
        p.save_snapshot(&state("a", "old"), Some("a")).await;
        let old_id = p.load_version_history("a").await[0].id.clone();

        let data = p
            .restore_version(&old_id, "a", &state("a", "new"))
            .await
            .unwrap();
        assert_eq!(data["presentations"]["a"]["title"], "old");

        // The pre-restore backup holds the state being replaced
        let versions = p.load_version_history("a").await;
        let backup = versions.iter().find(|v| v.is_recovery_point).unwrap();
        assert_eq!(backup.description, "Pre-restore backup");
        assert_eq!(backup.data["presentations"]["a"]["title"], "new");

        let missing = p.restore_version("nope", "a", &state("a", "new")).await;
        assert!(matches!(missing, Err(AppError::VersionNotFound(_))));
    }

    #[tokio::test]
    async fn test_rehydrate() {
        let (p, storage) = persistence(PersistOptions::default());
        assert!(p.rehydrate().await.is_none());

        p.save_snapshot(&state("a", "Dogs"), Some("a")).await;
        let data = p.rehydrate().await.unwrap();
        assert_eq!(data["currentPresentationId"], "a");

        // A tampered root is ignored
        let bad = json!({
            "data": state("a", "Cats"),
            "version": 1,
            "timestamp": Utc::now(),
            "checksum": generate_checksum(&state("a", "Dogs")),
            "id": "x"
        });
        storage
            .set(DEFAULT_STORE_NAME, &bad.to_string())
            .await
            .unwrap();
        assert!(p.rehydrate().await.is_none());
    }
}
