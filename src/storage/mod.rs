//! Durable key-value storage for session records.
//!
//! The session core keeps three independent string records: the token+role
//! composite, the cached role string, and the serialized profile. Every
//! write replaces a whole record; last writer wins.
//!
//! - [`MemoryStore`]: process-local map, used by tests and ephemeral sessions
//! - [`FileStore`]: one JSON object on disk, replaced atomically on write

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageError;

/// Key under which the cached role string lives.
pub const USER_ROLE_KEY: &str = "userRole";

/// Key under which the serialized profile lives.
pub const PROFILE_KEY: &str = "currentUserProfile";

/// A string key-value store with whole-record read/replace semantics.
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Build the store selected by configuration.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>, StorageError> {
    let store: Arc<dyn KeyValueStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::File => Arc::new(FileStore::open(&config.path)?),
    };
    Ok(store)
}
