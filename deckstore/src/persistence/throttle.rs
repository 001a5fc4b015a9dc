//! Background persistence worker
//!
//! Watches store revisions and writes a snapshot at most once per throttle
//! window. A burst of mutations opens one window; everything that happens
//! inside it lands in the single save at the window's end. The auto-save
//! timer opens a window on its own so idle sessions are still saved.
//!
//! Shutdown flushes a pending save before the worker exits.

use super::EnhancedPersistence;
use crate::store::Store;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Handle to the running worker
pub struct PersistenceHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl PersistenceHandle {
    /// Stop the worker, waiting for any pending save to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("Persistence worker ended abnormally: {}", e);
        }
    }
}

/// Start the debounce/auto-save loop for `store`
pub fn spawn_persistence_worker(store: Store, persistence: Arc<EnhancedPersistence>) -> PersistenceHandle {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let mut revisions = store.subscribe();

    let task = tokio::spawn(async move {
        let throttle = persistence.options().throttle;
        let mut auto_save = persistence.options().auto_save_interval.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut deadline: Option<Instant> = None;

        tracing::info!("Starting persistence worker (throttle {:?})", throttle);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    if deadline.is_some() || revisions.has_changed().unwrap_or(false) {
                        flush(&store, &persistence).await;
                    }
                    break;
                }
                changed = revisions.changed() => {
                    if changed.is_err() {
                        flush(&store, &persistence).await;
                        break;
                    }
                    deadline.get_or_insert_with(|| Instant::now() + throttle);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    flush(&store, &persistence).await;
                }
                _ = tick(&mut auto_save) => {
                    if store.current_presentation_id().await.is_some() {
                        deadline.get_or_insert_with(|| Instant::now() + throttle);
                    }
                }
            }
        }

        tracing::info!("Persistence worker stopped");
    });

    PersistenceHandle { shutdown, task }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn flush(store: &Store, persistence: &EnhancedPersistence) {
    match store.persisted_value().await {
        Ok((state, presentation_id)) => {
            persistence
                .save_snapshot(&state, presentation_id.as_deref())
                .await;
        }
        Err(e) => tracing::error!("Error snapshotting store: {}", e),
    }
}
