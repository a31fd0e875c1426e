//! Cache keys and cacheable implementations for job types.

use sha2::{Digest, Sha256};

use crate::cache::Cacheable;

use super::types::{JobDetail, JobFilters};

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for JobDetail {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "job_detail"
  }
}

// ============================================================================
// Query keys
// ============================================================================

/// Query keys for Jobs API list calls.
#[derive(Clone, Debug)]
pub enum JobQueryKey<'a> {
  /// One page of `GET /jobs`
  Page(&'a JobFilters),
}

impl JobQueryKey<'_> {
  /// Stable key for the cache.
  ///
  /// The canonical input is the JSON encoding of the normalized filter tuple
  /// (the same values `JobsClient::list_jobs` sends), which
  /// is unambiguous (no separator can be forged by a field value), so two
  /// different tuples never share an input and identical tuples always do.
  pub fn cache_hash(&self) -> String {
    let input = match self {
      Self::Page(filters) => {
        let f = filters.normalized();
        let tuple = (
          f.technician_id,
          f.status,
          f.date_from,
          f.date_to,
          f.priority,
          f.offset,
          f.limit,
        );
        // Serializing a tuple of strings and integers cannot fail
        format!(
          "jobs_page:{}",
          serde_json::to_string(&tuple).unwrap_or_default()
        )
      }
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn description(&self) -> String {
    match self {
      Self::Page(f) => {
        let mut parts = Vec::new();
        if let Some(t) = &f.technician_id {
          parts.push(format!("technician {}", t));
        }
        if let Some(s) = &f.status {
          parts.push(format!("status {}", s));
        }
        if let Some(p) = &f.priority {
          parts.push(format!("priority {}", p));
        }
        parts.push(format!("offset {} limit {}", f.offset, f.limit));
        format!("jobs: {}", parts.join(", "))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn key(filters: &JobFilters) -> String {
    JobQueryKey::Page(filters).cache_hash()
  }

  #[test]
  fn test_same_filters_same_key() {
    let a = JobFilters::default().with_status("assigned");
    let b = JobFilters::default().with_status("assigned");
    assert_eq!(key(&a), key(&b));
  }

  #[test]
  fn test_offset_changes_key() {
    let a = JobFilters::default().with_status("assigned");
    assert_ne!(key(&a), key(&a.at_offset(20)));
  }

  #[test]
  fn test_blank_filter_is_absent() {
    let a = JobFilters::default();
    let b = JobFilters {
      status: Some("  ".into()),
      ..JobFilters::default()
    };
    assert_eq!(key(&a), key(&b));
  }

  #[test]
  fn test_field_position_matters() {
    let a = JobFilters {
      status: Some("high".into()),
      ..JobFilters::default()
    };
    let b = JobFilters {
      priority: Some("high".into()),
      ..JobFilters::default()
    };
    assert_ne!(key(&a), key(&b));
  }

  #[test]
  fn test_separator_in_value_cannot_collide() {
    let a = JobFilters {
      technician_id: Some("t1\",\"x".into()),
      ..JobFilters::default()
    };
    let b = JobFilters {
      technician_id: Some("t1".into()),
      status: Some("x".into()),
      ..JobFilters::default()
    };
    assert_ne!(key(&a), key(&b));
  }

  #[test]
  fn test_description() {
    let f = JobFilters::default().with_technician("T9").with_status("assigned");
    assert_eq!(
      JobQueryKey::Page(&f).description(),
      "jobs: technician T9, status assigned, offset 0 limit 20"
    );
  }

  fn filters_strategy() -> impl Strategy<Value = JobFilters> {
    let field = proptest::option::of("[a-z0-9]{1,6}");
    (
      field.clone(),
      field.clone(),
      field.clone(),
      field,
      0u32..200,
      1u32..50,
    )
      .prop_map(|(technician_id, status, priority, date_from, offset, limit)| JobFilters {
        technician_id,
        status,
        date_from,
        date_to: None,
        priority,
        limit,
        offset,
      })
  }

  /// Filter values with optional padding and blanks mixed in.
  fn padded_filters_strategy() -> impl Strategy<Value = JobFilters> {
    let field = proptest::option::of("[ ]{0,2}[ab]{0,2}[ ]{0,2}");
    (field.clone(), field.clone(), field, 0u32..3, 1u32..3).prop_map(
      |(technician_id, status, priority, offset, limit)| JobFilters {
        technician_id,
        status,
        date_from: None,
        date_to: None,
        priority,
        limit,
        offset,
      },
    )
  }

  proptest! {
    #[test]
    fn prop_keys_match_exactly_when_requests_match(
      a in padded_filters_strategy(),
      b in padded_filters_strategy(),
    ) {
      let same_request = a.normalized() == b.normalized();
      prop_assert_eq!(key(&a) == key(&b), same_request);
    }

    #[test]
    fn prop_key_is_deterministic(f in filters_strategy()) {
      prop_assert_eq!(key(&f), key(&f.clone()));
    }

    #[test]
    fn prop_distinct_filters_distinct_keys(a in filters_strategy(), b in filters_strategy()) {
      prop_assume!(a != b);
      prop_assert_ne!(key(&a), key(&b));
    }
  }
}
