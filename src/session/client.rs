use std::time::Duration;

use chrono::DateTime;
use serde::Serialize;
use serde_json::json;

use crate::net::{fetch_with_timeout, ApiRequest, FetchError, SharedTransport, SESSION_TIMEOUT};

use super::monitor::SessionEnd;

/// Session API client. Calls are short-bounded since several of them run
/// while the process is shutting down.
#[derive(Clone)]
pub struct SessionClient {
  transport: SharedTransport,
  timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionStart<'a> {
  technician_id: &'a str,
  session_start: String,
  session_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Heartbeat<'a> {
  technician_id: &'a str,
  timestamp: String,
  is_active: bool,
  last_activity: String,
}

impl SessionClient {
  pub fn new(transport: SharedTransport) -> Self {
    Self {
      transport,
      timeout: SESSION_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), FetchError> {
    fetch_with_timeout(
      self.transport.as_ref(),
      ApiRequest::post(path, body),
      self.timeout,
    )
    .await?;
    Ok(())
  }

  /// `POST /session/start`
  pub async fn start(
    &self,
    technician_id: &str,
    session_id: &str,
    started_at_ms: i64,
  ) -> Result<(), FetchError> {
    let body = SessionStart {
      technician_id,
      session_start: iso(started_at_ms),
      session_id,
    };
    self.post("/session/start", to_json(&body)?).await
  }

  /// `POST /session/heartbeat`
  pub async fn heartbeat(
    &self,
    technician_id: &str,
    now_ms: i64,
    is_active: bool,
    last_activity_ms: i64,
  ) -> Result<(), FetchError> {
    let body = Heartbeat {
      technician_id,
      timestamp: iso(now_ms),
      is_active,
      last_activity: iso(last_activity_ms),
    };
    self.post("/session/heartbeat", to_json(&body)?).await
  }

  /// `POST /clock-records`: clock the technician out at session end.
  pub async fn clock_out(&self, end: &SessionEnd) -> Result<(), FetchError> {
    let body = json!({
      "technicianId": end.technician_id,
      "sessionId": end.session_id,
      "type": "clock_out",
      "clockIn": iso(end.started_at_ms),
      "clockOut": iso(end.ended_at_ms),
      "durationMinutes": end.duration_ms / 60_000,
      "reason": end.reason.as_str(),
      "automatic": end.reason.is_automatic(),
    });
    self.post("/clock-records", body).await
  }

  /// `POST /events/logout`
  pub async fn logout_event(&self, end: &SessionEnd) -> Result<(), FetchError> {
    let body = json!({
      "technicianId": end.technician_id,
      "sessionId": end.session_id,
      "reason": end.reason.as_str(),
      "timestamp": iso(end.ended_at_ms),
    });
    self.post("/events/logout", body).await
  }

  /// `POST /notifications/`: tell the office the session ended on its own.
  pub async fn notify_session_end(&self, end: &SessionEnd) -> Result<(), FetchError> {
    let body = json!({
      "type": "session_end",
      "technicianId": end.technician_id,
      "message": format!(
        "Session for {} ended ({}) after {} minutes",
        end.technician_id,
        end.reason.as_str(),
        end.duration_ms / 60_000
      ),
      "timestamp": iso(end.ended_at_ms),
    });
    self.post("/notifications/", body).await
  }
}

fn to_json(body: &impl Serialize) -> Result<serde_json::Value, FetchError> {
  serde_json::to_value(body).map_err(|e| FetchError::Decode(e.to_string()))
}

/// RFC 3339 timestamp for an epoch-ms value.
fn iso(epoch_ms: i64) -> String {
  DateTime::from_timestamp_millis(epoch_ms)
    .map(|dt| dt.to_rfc3339())
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::monitor::EndReason;
  use crate::test_support::FakeApi;
  use std::sync::Arc;

  fn end(reason: EndReason) -> SessionEnd {
    SessionEnd {
      technician_id: "T1".into(),
      session_id: "s-1".into(),
      started_at_ms: 0,
      ended_at_ms: 3_600_000,
      duration_ms: 3_600_000,
      reason,
    }
  }

  #[test]
  fn test_iso() {
    assert_eq!(iso(0), "1970-01-01T00:00:00+00:00");
  }

  #[tokio::test]
  async fn test_start_body() {
    let api = FakeApi::new();
    let client = SessionClient::new(Arc::new(api.clone()));
    client.start("T1", "s-1", 0).await.unwrap();

    let posts = api.posts("/session/start");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["technicianId"], "T1");
    assert_eq!(posts[0]["sessionId"], "s-1");
    assert_eq!(posts[0]["sessionStart"], "1970-01-01T00:00:00+00:00");
  }

  #[tokio::test]
  async fn test_clock_out_body() {
    let api = FakeApi::new();
    let client = SessionClient::new(Arc::new(api.clone()));
    client.clock_out(&end(EndReason::Inactivity)).await.unwrap();

    let posts = api.posts("/clock-records");
    assert_eq!(posts[0]["durationMinutes"], 60);
    assert_eq!(posts[0]["reason"], "inactivity");
    assert_eq!(posts[0]["automatic"], true);
  }

  #[tokio::test]
  async fn test_heartbeat_http_error_surfaces() {
    let api = FakeApi::new();
    api.respond_with("/session/heartbeat", 503);
    let client = SessionClient::new(Arc::new(api));
    let err = client.heartbeat("T1", 10, true, 5).await.unwrap_err();
    assert_eq!(err, FetchError::Http { status: 503 });
  }
}
