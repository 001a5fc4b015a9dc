//! Application store
//!
//! Composes the presentations and generation slices into one observable
//! state container. `Store` is a cheap clonable handle: reads go through
//! `select`, writes through `mutate`, and every write bumps a revision that
//! subscribers (the persistence worker, UI bindings) are notified of.
//!
//! When built with an `EnhancedPersistence`, the store also exposes version
//! history, restore and crash recovery.

pub mod generation;
pub mod machine;
pub mod orchestration;
pub mod presentations;

pub use generation::{
    GenerationAttempt, GenerationSettings, GenerationSettingsUpdate, GenerationState,
    GenerationTask, ImageProvider, PartialResult,
};
pub use machine::{GenerationKind, TaskEvent, TaskStatus};
pub use orchestration::FullPresentationResult;
pub use presentations::{
    PresentationMetadata, PresentationSettings, PresentationSettingsUpdate, PresentationUpdate,
    PresentationsState, SyncStatus, Theme,
};

use crate::error::{AppError, Result};
use crate::persistence::{EnhancedPersistence, PresentationVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub presentations: PresentationsState,
    pub generation: GenerationState,
}

/// The part of the state that is written to storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub presentations: HashMap<String, PresentationMetadata>,
    #[serde(default)]
    pub current_presentation_id: Option<String>,
    #[serde(default)]
    pub tasks: HashMap<String, GenerationTask>,
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub global_settings: GenerationSettings,
}

impl StoreState {
    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            presentations: self.presentations.presentations.clone(),
            current_presentation_id: self.presentations.current_presentation_id.clone(),
            tasks: self.generation.tasks.clone(),
            history: self.generation.history.clone(),
            global_settings: self.generation.global_settings.clone(),
        }
    }

    /// Replace the persisted fields with `persisted`; runtime-only fields
    /// are reset
    pub fn apply_persisted(&mut self, persisted: PersistedState) {
        self.presentations.presentations = persisted.presentations;
        self.presentations.current_presentation_id = persisted
            .current_presentation_id
            .filter(|id| self.presentations.presentations.contains_key(id));
        self.generation.tasks = persisted.tasks;
        self.generation.history = persisted.history;
        self.generation.global_settings = persisted.global_settings;
        self.generation.rebuild_after_rehydrate();
    }
}

#[derive(Clone)]
pub struct Store {
    state: Arc<RwLock<StoreState>>,
    revision: Arc<watch::Sender<u64>>,
    persistence: Option<Arc<EnhancedPersistence>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// In-memory store without persistence
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            revision: Arc::new(revision),
            persistence: None,
        }
    }

    pub fn with_persistence(persistence: Arc<EnhancedPersistence>) -> Self {
        Self {
            persistence: Some(persistence),
            ..Self::new()
        }
    }

    pub fn persistence(&self) -> Option<&Arc<EnhancedPersistence>> {
        self.persistence.as_ref()
    }

    /// Read from the state
    pub async fn select<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        let state = self.state.read().await;
        f(&state)
    }

    /// Apply a synchronous mutation and notify subscribers
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        let result = {
            let mut state = self.state.write().await;
            f(&mut state)
        };
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
        result
    }

    /// Receiver that is notified after every mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub async fn current_presentation_id(&self) -> Option<String> {
        self.select(|s| s.presentations.current_presentation_id.clone())
            .await
    }

    pub async fn snapshot(&self) -> PersistedState {
        self.select(StoreState::to_persisted).await
    }

    /// Persisted state as JSON plus the active presentation id
    pub async fn persisted_value(&self) -> Result<(Value, Option<String>)> {
        let snapshot = self.snapshot().await;
        let presentation_id = snapshot.current_presentation_id.clone();
        Ok((serde_json::to_value(snapshot)?, presentation_id))
    }

    // ===== Versioning =====

    /// Record a named recovery point for the current presentation.
    ///
    /// Returns false when there is no active presentation or no persistence.
    pub async fn save_version(&self, description: &str) -> bool {
        let Some(persistence) = &self.persistence else {
            tracing::warn!("Cannot save version: persistence is not configured");
            return false;
        };
        let (state, presentation_id) = match self.persisted_value().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("Error snapshotting store: {}", e);
                return false;
            }
        };
        let Some(presentation_id) = presentation_id else {
            return false;
        };

        persistence
            .create_recovery_point(&state, &presentation_id, description)
            .await;
        true
    }

    pub async fn get_version_history(&self, presentation_id: &str) -> Vec<PresentationVersion> {
        match &self.persistence {
            Some(persistence) => persistence.load_version_history(presentation_id).await,
            None => Vec::new(),
        }
    }

    /// Restore one presentation from a stored version.
    ///
    /// Only that presentation's entry is merged back into live state. Returns
    /// `Ok(false)` when the version holds no data for it.
    pub async fn restore_version(&self, version_id: &str, presentation_id: &str) -> Result<bool> {
        let persistence = self
            .persistence
            .as_ref()
            .ok_or_else(|| AppError::Storage("Persistence is not configured".to_string()))?;

        let (current, _) = self.persisted_value().await?;
        let data = persistence
            .restore_version(version_id, presentation_id, &current)
            .await?;

        let Some(entry) = data
            .get("presentations")
            .and_then(|p| p.get(presentation_id))
            .cloned()
        else {
            tracing::warn!(
                "Version {} holds no data for presentation {}",
                version_id,
                presentation_id
            );
            return Ok(false);
        };
        let presentation: PresentationMetadata = serde_json::from_value(entry)?;

        self.mutate(|s| s.presentations.upsert_presentation(presentation))
            .await;
        Ok(true)
    }

    /// Recovered state left behind by a crashed session, if any
    pub async fn check_for_crash(&self, presentation_id: &str) -> Option<PersistedState> {
        let persistence = self.persistence.as_ref()?;
        let data = persistence.check_for_crash(presentation_id).await?;

        match serde_json::from_value(data) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::error!("Recovered data for {} has an unexpected shape: {}", presentation_id, e);
                None
            }
        }
    }

    /// Load the state persisted by a previous session.
    ///
    /// Returns false when nothing usable was stored.
    pub async fn rehydrate(&self) -> bool {
        let Some(persistence) = &self.persistence else {
            return false;
        };
        let Some(data) = persistence.rehydrate().await else {
            return false;
        };

        let persisted: PersistedState = match serde_json::from_value(data) {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::error!("Error rehydrating store: {}", e);
                return false;
            }
        };

        tracing::info!(
            "Rehydrated {} presentations and {} tasks",
            persisted.presentations.len(),
            persisted.tasks.len()
        );
        self.mutate(|s| s.apply_persisted(persisted)).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersistOptions;
    use crate::storage::{MemoryStorageAdapter, StorageAdapter};
    use serde_json::Map;

    fn persistent_store() -> (Store, MemoryStorageAdapter) {
        let storage = MemoryStorageAdapter::new();
        let persistence = Arc::new(EnhancedPersistence::new(
            Arc::new(storage.clone()),
            PersistOptions::default(),
        ));
        (Store::with_persistence(persistence), storage)
    }

    #[tokio::test]
    async fn test_mutate_notifies_subscribers() {
        let store = Store::new();
        let rx = store.subscribe();

        store
            .mutate(|s| s.presentations.create_presentation("Dogs", None))
            .await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(store.revision(), 1);
    }

    #[tokio::test]
    async fn test_persisted_shape() {
        let store = Store::new();
        store
            .mutate(|s| {
                s.presentations.create_presentation("Dogs", None);
                s.generation
                    .create_task(GenerationKind::Outline, "x", Map::new());
            })
            .await;

        let (value, pid) = store.persisted_value().await.unwrap();
        assert!(pid.is_some());
        assert!(value["presentations"].is_object());
        assert!(value["tasks"].is_object());
        assert!(value["globalSettings"]["maxRetries"].is_number());
        assert!(value.get("queue").is_none());
    }

    #[tokio::test]
    async fn test_save_version_scoped_to_current() {
        let (store, _storage) = persistent_store();
        let (a, b) = store
            .mutate(|s| {
                let b = s.presentations.create_presentation("B", None);
                let a = s.presentations.create_presentation("A", None);
                (a, b)
            })
            .await;

        assert!(store.save_version("checkpoint").await);

        let history_a = store.get_version_history(&a).await;
        assert_eq!(history_a.len(), 1);
        assert_eq!(history_a[0].description, "checkpoint");
        assert!(store.get_version_history(&b).await.is_empty());
    }

    #[tokio::test]
    async fn test_save_version_without_presentation() {
        let (store, _storage) = persistent_store();
        assert!(!store.save_version("nothing open").await);
        assert!(!Store::new().save_version("no persistence").await);
    }

    #[tokio::test]
    async fn test_restore_version_merges_one_presentation() {
        let (store, _storage) = persistent_store();
        let (a, b) = store
            .mutate(|s| {
                let b = s.presentations.create_presentation("B", None);
                let a = s.presentations.create_presentation("A", None);
                (a, b)
            })
            .await;
        store.save_version("before rename").await;
        let version_id = store.get_version_history(&a).await[0].id.clone();

        store
            .mutate(|s| {
                let rename = |title: &str| PresentationUpdate {
                    title: Some(title.to_string()),
                    ..Default::default()
                };
                s.presentations.update_presentation(&a, rename("A2"));
                s.presentations.update_presentation(&b, rename("B2"));
            })
            .await;

        assert!(store.restore_version(&version_id, &a).await.unwrap());

        let (title_a, title_b) = store
            .select(|s| {
                (
                    s.presentations.get(&a).unwrap().title.clone(),
                    s.presentations.get(&b).unwrap().title.clone(),
                )
            })
            .await;
        assert_eq!(title_a, "A");
        assert_eq!(title_b, "B2");

        assert!(store.restore_version("missing", &a).await.is_err());
    }

    #[tokio::test]
    async fn test_rehydrate_round_trip() {
        let (store, storage) = persistent_store();
        let pid = store
            .mutate(|s| {
                let pid = s.presentations.create_presentation("Dogs", None);
                s.generation
                    .create_task(GenerationKind::Outline, "x", Map::new());
                pid
            })
            .await;
        let (value, current) = store.persisted_value().await.unwrap();
        store
            .persistence()
            .unwrap()
            .save_snapshot(&value, current.as_deref())
            .await;

        let persistence = Arc::new(EnhancedPersistence::new(
            Arc::new(storage.clone()),
            PersistOptions::default(),
        ));
        let reloaded = Store::with_persistence(persistence);
        assert!(reloaded.rehydrate().await);

        let (current, queue_len) = reloaded
            .select(|s| {
                (
                    s.presentations.current_presentation_id.clone(),
                    s.generation.queue.len(),
                )
            })
            .await;
        assert_eq!(current, Some(pid));
        assert_eq!(queue_len, 1);
    }

    #[tokio::test]
    async fn test_check_for_crash_parses_state() {
        let (store, storage) = persistent_store();
        let pid = store
            .mutate(|s| s.presentations.create_presentation("Dogs", None))
            .await;

        assert!(store.check_for_crash(&pid).await.is_none());

        store.save_version("before risky edit").await;
        let recovered = store.check_for_crash(&pid).await.unwrap();
        assert_eq!(recovered.presentations[&pid].title, "Dogs");

        let recovery_key = store.persistence().unwrap().recovery_key(&pid);
        assert!(storage.get(&recovery_key).await.unwrap().is_none());
    }
}
