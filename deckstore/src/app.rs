//! Application state and initialization
//!
//! Builds the storage stack, the generation client and the store, runs the
//! startup migrations and starts the persistence worker. Everything the
//! application needs afterwards is reachable through `AppState`.

use crate::config::AppConfig;
use crate::error::Result;
use crate::migrations;
use crate::persistence::{spawn_persistence_worker, EnhancedPersistence, PersistOptions, PersistenceHandle};
use crate::services::{GenerationApi, HttpGenerationApi};
use crate::storage::{
    DatabaseStorageAdapter, LocalStorageAdapter, MultiStorageAdapter, RemoteStorageAdapter,
    StorageAdapter,
};
use crate::store::Store;
use std::sync::Arc;

/// Central application state
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub api: Arc<dyn GenerationApi>,
    pub persistence: Arc<EnhancedPersistence>,
    /// Holds legacy keys from older versions as well as current state
    pub local: Arc<LocalStorageAdapter>,
    pub remote: Option<Arc<RemoteStorageAdapter>>,
    worker: PersistenceHandle,
}

impl AppState {
    /// Stop the persistence worker, flushing any pending save
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");
        self.worker.shutdown().await;
    }
}

/// Application setup - called once on startup
pub async fn setup(config: AppConfig) -> Result<AppState> {
    tracing::info!("Initializing application");
    tracing::info!("Data directory: {:?}", config.data_dir);

    std::fs::create_dir_all(&config.data_dir)?;

    let local = Arc::new(LocalStorageAdapter::in_dir(&config.data_dir));
    let database = Arc::new(DatabaseStorageAdapter::in_dir(&config.data_dir));
    // Read priority: fast local backends first
    let mut adapters: Vec<Arc<dyn StorageAdapter>> = Vec::new();
    adapters.push(local.clone());
    adapters.push(database);

    let remote = match (&config.remote_url, &config.remote_api_key) {
        (Some(url), Some(key)) => {
            let remote = Arc::new(RemoteStorageAdapter::new(
                url,
                key,
                config.remote_user_id.clone(),
            )?);
            adapters.push(remote.clone());
            tracing::info!("Remote storage enabled at {}", url);
            Some(remote)
        }
        _ => None,
    };

    let adapter = Arc::new(MultiStorageAdapter::new(adapters));
    let persistence = Arc::new(EnhancedPersistence::new(
        adapter,
        PersistOptions::from_config(&config),
    ));
    let store = Store::with_persistence(persistence.clone());
    let api: Arc<dyn GenerationApi> = Arc::new(HttpGenerationApi::new(&config.ai_service_url)?);

    migrations::initialize_persistence(&store, local.as_ref()).await;

    let worker = spawn_persistence_worker(store.clone(), persistence.clone());

    tracing::info!("Application initialized successfully");

    Ok(AppState {
        config,
        store,
        api,
        persistence,
        local,
        remote,
        worker,
    })
}
