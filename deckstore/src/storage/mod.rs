//! Storage module
//!
//! Uniform async key/value interface over the persistence backends. Values
//! are opaque strings (serialized JSON envelopes).

pub mod database;
pub mod local;
pub mod memory;
pub mod multi;
pub mod remote;

pub use database::DatabaseStorageAdapter;
pub use local::LocalStorageAdapter;
pub use memory::MemoryStorageAdapter;
pub use multi::MultiStorageAdapter;
pub use remote::RemoteStorageAdapter;

use crate::error::Result;
use async_trait::async_trait;

/// A key/value backend.
///
/// Local backends swallow and log their own failures, returning `Ok(None)`
/// or `Ok(())`. Network backends return errors so callers composing several
/// backends can tell which writes landed.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Short backend name used in log lines
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}
