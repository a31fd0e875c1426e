//! Generic caching layer for data persistence and offline support.
//!
//! This module is domain-agnostic. It provides:
//! - A non-failing facade over a string key-value store (SQLite or memory)
//! - TTL-bound list and single-entity entries in separate namespaces
//! - A durable FIFO of mutations waiting for remote confirmation

mod manager;
mod queue;
mod storage;
mod traits;

pub use manager::{CacheManager, DEFAULT_TTL, LAST_SYNC_KEY, LIST_PREFIX, QUEUE_KEY};
pub use queue::{MutationAction, QueuedMutation};
pub use storage::{
  DurableStore, MemoryBackend, NoopBackend, SqliteBackend, StorageBackend, StorageError,
};
pub use traits::{CacheEntry, Cacheable, Lookup};

#[cfg(test)]
pub(crate) use storage::temp_db_path;
