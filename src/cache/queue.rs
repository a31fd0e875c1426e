//! Offline write queue entries.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static MUTATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A pending write, tagged by the remote action that confirms it.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationAction {
  /// `PUT /jobs/{id}/status`
  UpdateStatus {
    status: String,
    extra: Map<String, Value>,
  },
}

impl MutationAction {
  pub fn name(&self) -> &'static str {
    match self {
      MutationAction::UpdateStatus { .. } => "updateStatus",
    }
  }
}

/// A mutation waiting for remote confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StoredMutation", try_from = "StoredMutation")]
pub struct QueuedMutation {
  pub id: String,
  pub action: MutationAction,
  pub target_id: String,
  pub enqueued_at_epoch_ms: i64,
}

/// Persisted shape: `{ id, action, targetId, payload, enqueuedAtEpochMs }`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMutation {
  id: String,
  action: String,
  target_id: String,
  #[serde(default)]
  payload: Value,
  enqueued_at_epoch_ms: i64,
}

#[derive(Serialize, Deserialize)]
struct StatusPayload {
  status: String,
  #[serde(default)]
  extra: Map<String, Value>,
}

impl From<QueuedMutation> for StoredMutation {
  fn from(m: QueuedMutation) -> Self {
    let action = m.action.name().to_string();
    let payload = match m.action {
      MutationAction::UpdateStatus { status, extra } => {
        serde_json::to_value(StatusPayload { status, extra }).unwrap_or(Value::Null)
      }
    };
    Self {
      id: m.id,
      action,
      target_id: m.target_id,
      payload,
      enqueued_at_epoch_ms: m.enqueued_at_epoch_ms,
    }
  }
}

impl TryFrom<StoredMutation> for QueuedMutation {
  type Error = String;

  fn try_from(s: StoredMutation) -> Result<Self, Self::Error> {
    let action = match s.action.as_str() {
      "updateStatus" => {
        let p: StatusPayload = serde_json::from_value(s.payload)
          .map_err(|e| format!("bad updateStatus payload: {}", e))?;
        MutationAction::UpdateStatus {
          status: p.status,
          extra: p.extra,
        }
      }
      other => return Err(format!("unknown mutation action '{}'", other)),
    };
    Ok(Self {
      id: s.id,
      action,
      target_id: s.target_id,
      enqueued_at_epoch_ms: s.enqueued_at_epoch_ms,
    })
  }
}

impl QueuedMutation {
  pub fn new(action: MutationAction, target_id: impl Into<String>, now_ms: i64) -> Self {
    let seq = MUTATION_COUNTER.fetch_add(1, Ordering::SeqCst);
    Self {
      id: format!("mut-{}-{}", now_ms, seq),
      action,
      target_id: target_id.into(),
      enqueued_at_epoch_ms: now_ms,
    }
  }

  pub fn update_status(
    target_id: impl Into<String>,
    status: impl Into<String>,
    extra: Map<String, Value>,
    now_ms: i64,
  ) -> Self {
    Self::new(
      MutationAction::UpdateStatus {
        status: status.into(),
        extra,
      },
      target_id,
      now_ms,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ids_are_unique_within_same_millisecond() {
    let a = QueuedMutation::update_status("J1", "completed", Map::new(), 10);
    let b = QueuedMutation::update_status("J1", "completed", Map::new(), 10);
    assert_ne!(a.id, b.id);
  }

  #[test]
  fn test_wire_shape_is_tagged() {
    let mut extra = Map::new();
    extra.insert("note".into(), Value::String("gate locked".into()));
    let m = QueuedMutation::update_status("J7", "on_hold", extra, 99);

    let json: Value = serde_json::to_value(&m).unwrap();
    assert_eq!(json["action"], "updateStatus");
    assert_eq!(json["targetId"], "J7");
    assert_eq!(json["payload"]["status"], "on_hold");
    assert_eq!(json["payload"]["extra"]["note"], "gate locked");
    assert_eq!(json["enqueuedAtEpochMs"], 99);

    let back: QueuedMutation = serde_json::from_value(json).unwrap();
    assert_eq!(back, m);
  }

  #[test]
  fn test_unknown_action_is_rejected() {
    let json = serde_json::json!({
      "id": "mut-1",
      "action": "deleteEverything",
      "targetId": "J1",
      "payload": {},
      "enqueuedAtEpochMs": 1
    });
    assert!(serde_json::from_value::<QueuedMutation>(json).is_err());
  }
}
