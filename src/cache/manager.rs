//! Cache manager: TTL-bound list and detail entries plus the offline write queue.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::queue::QueuedMutation;
use super::storage::DurableStore;
use super::traits::{CacheEntry, Cacheable, Lookup};
use crate::clock::SharedClock;

pub const LIST_PREFIX: &str = "jobs_list:";
pub const LAST_SYNC_KEY: &str = "last_sync";
pub const QUEUE_KEY: &str = "sync_queue";

/// Default time-to-live for cached entries
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Owns every cache entry and the durable queue of pending mutations.
///
/// Constructed explicitly and shared by `Arc`; there is no global instance.
pub struct CacheManager {
  store: DurableStore,
  clock: SharedClock,
  ttl_ms: i64,
  /// Guards every read-modify-write of the queue key
  queue_lock: Mutex<()>,
  /// Serializes whole drain passes
  drain_lock: tokio::sync::Mutex<()>,
}

impl CacheManager {
  pub fn new(store: DurableStore, clock: SharedClock) -> Self {
    Self {
      store,
      clock,
      ttl_ms: DEFAULT_TTL.as_millis() as i64,
      queue_lock: Mutex::new(()),
      drain_lock: tokio::sync::Mutex::new(()),
    }
  }

  /// Set the time-to-live for cached entries.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl_ms = ttl.as_millis() as i64;
    self
  }

  pub fn ttl(&self) -> Duration {
    Duration::from_millis(self.ttl_ms.max(0) as u64)
  }

  pub fn now_ms(&self) -> i64 {
    self.clock.now_ms()
  }

  // ==========================================================================
  // Lists
  // ==========================================================================

  /// Fresh list for `key`, evicting the entry if it has expired.
  pub fn get_list<T: DeserializeOwned>(&self, key: &str) -> Option<Vec<T>> {
    let slot = list_slot(key);
    match self.read_entry::<Vec<T>>(&slot) {
      Lookup::Fresh(entry) => {
        debug!(key, "list cache hit");
        Some(entry.payload)
      }
      Lookup::Stale(_) => {
        debug!(key, "list cache expired, evicting");
        self.store.remove(&slot);
        None
      }
      Lookup::Miss => None,
    }
  }

  /// List lookup that keeps stale entries in place.
  pub fn lookup_list<T: DeserializeOwned>(&self, key: &str) -> Lookup<Vec<T>> {
    self.read_entry(&list_slot(key))
  }

  pub fn put_list<T: Serialize>(&self, key: &str, items: &[T]) {
    self.write_entry(&list_slot(key), items);
  }

  /// Evict every list entry.
  pub fn invalidate_all_lists(&self) -> usize {
    let keys = self.store.keys_with_prefix(LIST_PREFIX);
    for key in &keys {
      self.store.remove(key);
    }
    if !keys.is_empty() {
      debug!(count = keys.len(), "invalidated list cache");
    }
    keys.len()
  }

  // ==========================================================================
  // Details
  // ==========================================================================

  /// Fresh detail for `id`, evicting the entry if it has expired.
  pub fn get_detail<T: Cacheable>(&self, id: &str) -> Option<T> {
    let slot = detail_slot::<T>(id);
    match self.read_entry::<T>(&slot) {
      Lookup::Fresh(entry) => Some(entry.payload),
      Lookup::Stale(_) => {
        self.store.remove(&slot);
        None
      }
      Lookup::Miss => None,
    }
  }

  pub fn lookup_detail<T: Cacheable>(&self, id: &str) -> Lookup<T> {
    self.read_entry(&detail_slot::<T>(id))
  }

  pub fn put_detail<T: Cacheable>(&self, item: &T) {
    self.write_entry(&detail_slot::<T>(&item.cache_key()), item);
  }

  pub fn remove_detail<T: Cacheable>(&self, id: &str) {
    self.store.remove(&detail_slot::<T>(id));
  }

  // ==========================================================================
  // Sync clock
  // ==========================================================================

  pub fn mark_synced(&self) {
    self
      .store
      .set(LAST_SYNC_KEY, &self.clock.now_ms().to_string());
  }

  pub fn last_sync(&self) -> Option<i64> {
    self.store.get(LAST_SYNC_KEY)?.parse().ok()
  }

  // ==========================================================================
  // Offline write queue
  // ==========================================================================

  /// Append a mutation to the durable queue.
  ///
  /// The queue is unbounded; a write that exceeds the store's capacity is
  /// logged by the store and reported here as `false`.
  pub fn enqueue(&self, mutation: QueuedMutation) -> bool {
    let _guard = self.lock_queue();
    let mut queue = self.read_queue();
    debug!(id = %mutation.id, target = %mutation.target_id, "enqueue mutation");
    queue.push(mutation);
    self.write_queue(&queue)
  }

  /// Snapshot of the pending mutations, oldest first.
  pub fn pending(&self) -> Vec<QueuedMutation> {
    let _guard = self.lock_queue();
    self.read_queue()
  }

  pub fn queue_len(&self) -> usize {
    self.pending().len()
  }

  /// Replay every pending mutation in FIFO order.
  ///
  /// Mutations whose replay succeeds are removed; failures stay queued in
  /// their original position. A failure never stops later items from being
  /// tried. Mutations enqueued while the pass runs are preserved because the
  /// final rewrite filters the queue as it is at that moment, not the snapshot.
  /// Returns the number of confirmed mutations.
  pub async fn drain_queue<F, Fut, E>(&self, mut replay: F) -> usize
  where
    F: FnMut(QueuedMutation) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
  {
    let _drain = self.drain_lock.lock().await;

    let snapshot = {
      let _guard = self.lock_queue();
      self.read_queue()
    };
    if snapshot.is_empty() {
      return 0;
    }

    let total = snapshot.len();
    let mut confirmed: HashSet<String> = HashSet::new();
    for mutation in snapshot {
      let id = mutation.id.clone();
      let action = mutation.action.name();
      match replay(mutation).await {
        Ok(()) => {
          confirmed.insert(id);
        }
        Err(e) => {
          warn!(id = %id, action, error = %e, "replay failed, keeping mutation queued");
        }
      }
    }

    if !confirmed.is_empty() {
      let _guard = self.lock_queue();
      let remaining: Vec<QueuedMutation> = self
        .read_queue()
        .into_iter()
        .filter(|m| !confirmed.contains(&m.id))
        .collect();
      self.write_queue(&remaining);
    }

    info!(
      confirmed = confirmed.len(),
      failed = total - confirmed.len(),
      "queue drain finished"
    );
    confirmed.len()
  }

  // ==========================================================================
  // Internals
  // ==========================================================================

  fn lock_queue(&self) -> MutexGuard<'_, ()> {
    // The guarded data is (), so a poisoned lock carries no broken state.
    self.queue_lock.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn read_queue(&self) -> Vec<QueuedMutation> {
    let Some(raw) = self.store.get(QUEUE_KEY) else {
      return Vec::new();
    };
    match serde_json::from_str(&raw) {
      Ok(queue) => queue,
      Err(e) => {
        warn!(error = %e, "queue is unreadable, dropping it");
        self.store.remove(QUEUE_KEY);
        Vec::new()
      }
    }
  }

  fn write_queue(&self, queue: &[QueuedMutation]) -> bool {
    if queue.is_empty() {
      self.store.remove(QUEUE_KEY);
      return true;
    }
    match serde_json::to_string(queue) {
      Ok(raw) => self.store.set(QUEUE_KEY, &raw),
      Err(e) => {
        warn!(error = %e, "failed to serialize queue");
        false
      }
    }
  }

  fn read_entry<T: DeserializeOwned>(&self, slot: &str) -> Lookup<T> {
    let Some(raw) = self.store.get(slot) else {
      return Lookup::Miss;
    };
    match serde_json::from_str::<CacheEntry<T>>(&raw) {
      Ok(entry) if entry.is_fresh(self.clock.now_ms(), self.ttl_ms) => Lookup::Fresh(entry),
      Ok(entry) => Lookup::Stale(entry),
      Err(e) => {
        warn!(slot, error = %e, "corrupt cache entry, dropping it");
        self.store.remove(slot);
        Lookup::Miss
      }
    }
  }

  fn write_entry<T: Serialize + ?Sized>(&self, slot: &str, payload: &T) {
    let entry = CacheEntry::new(payload, self.clock.now_ms());
    match serde_json::to_string(&entry) {
      Ok(raw) => {
        self.store.set(slot, &raw);
      }
      Err(e) => warn!(slot, error = %e, "failed to serialize cache entry"),
    }
  }
}

fn list_slot(key: &str) -> String {
  format!("{}{}", LIST_PREFIX, key)
}

fn detail_slot<T: Cacheable>(id: &str) -> String {
  format!("{}:{}", T::entity_type(), id)
}
