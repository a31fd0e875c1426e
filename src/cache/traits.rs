//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Trait for entities that can be cached individually.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier for this entity (e.g., job id)
  fn cache_key(&self) -> String;

  /// Entity type name, used as the storage namespace (e.g., "job_detail")
  fn entity_type() -> &'static str;
}

/// A stored payload together with the time it was written.
///
/// The whole entry is serialized as one value, so a reader sees either the
/// previous entry or the new one and never a mix of both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
  pub payload: T,
  pub stored_at_epoch_ms: i64,
}

impl<T> CacheEntry<T> {
  pub fn new(payload: T, stored_at_epoch_ms: i64) -> Self {
    Self {
      payload,
      stored_at_epoch_ms,
    }
  }

  /// An entry is fresh while `now - stored_at < ttl`.
  pub fn is_fresh(&self, now_ms: i64, ttl_ms: i64) -> bool {
    now_ms - self.stored_at_epoch_ms < ttl_ms
  }
}

/// Outcome of a non-evicting cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
  /// Entry exists and is within its TTL
  Fresh(CacheEntry<T>),
  /// Entry exists but its TTL has elapsed
  Stale(CacheEntry<T>),
  /// Nothing usable is stored under the key
  Miss,
}

impl<T> Lookup<T> {
  pub fn into_fresh(self) -> Option<T> {
    match self {
      Lookup::Fresh(entry) => Some(entry.payload),
      _ => None,
    }
  }

  /// Payload regardless of freshness.
  pub fn into_any(self) -> Option<CacheEntry<T>> {
    match self {
      Lookup::Fresh(entry) | Lookup::Stale(entry) => Some(entry),
      Lookup::Miss => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fresh_strictly_inside_ttl() {
    let entry = CacheEntry::new("x", 1_000);
    assert!(entry.is_fresh(1_000, 300));
    assert!(entry.is_fresh(1_299, 300));
    assert!(!entry.is_fresh(1_300, 300));
    assert!(!entry.is_fresh(5_000, 300));
  }

  #[test]
  fn test_entry_serializes_camel_case() {
    let entry = CacheEntry::new(vec![1, 2], 7);
    let json = serde_json::to_string(&entry).unwrap();
    assert_eq!(json, r#"{"payload":[1,2],"storedAtEpochMs":7}"#);
  }
}
