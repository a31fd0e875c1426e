//! In-memory stand-in for the remote Jobs and Session APIs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use crate::jobs::{Appointment, ClientContact, JobDetail};
use crate::net::{ApiRequest, ApiResponse, FetchError, Method, Transport};

#[derive(Default)]
struct State {
  jobs: Vec<JobDetail>,
  failing_status: HashSet<String>,
  status_overrides: HashMap<String, u16>,
  calls: Vec<(Method, String)>,
  posts: Vec<(String, Value)>,
  delay: Duration,
}

/// Scriptable fake API with call counters.
#[derive(Clone)]
pub struct FakeApi {
  online: Arc<AtomicBool>,
  state: Arc<Mutex<State>>,
}

impl FakeApi {
  pub fn new() -> Self {
    Self {
      online: Arc::new(AtomicBool::new(true)),
      state: Arc::new(Mutex::new(State::default())),
    }
  }

  pub fn with_jobs(jobs: Vec<JobDetail>) -> Self {
    let api = Self::new();
    api.state.lock().unwrap().jobs = jobs;
    api
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn set_delay(&self, delay: Duration) {
    self.state.lock().unwrap().delay = delay;
  }

  /// Make `PUT /jobs/{id}/status` answer 500 for this id.
  pub fn fail_status_for(&self, id: &str) {
    self.state.lock().unwrap().failing_status.insert(id.to_string());
  }

  pub fn clear_status_failures(&self) {
    self.state.lock().unwrap().failing_status.clear();
  }

  /// Force a status code for every call to `path`.
  pub fn respond_with(&self, path: &str, status: u16) {
    self
      .state
      .lock()
      .unwrap()
      .status_overrides
      .insert(path.to_string(), status);
  }

  /// Number of calls with this method whose path equals `path`.
  pub fn count(&self, method: Method, path: &str) -> usize {
    self
      .state
      .lock()
      .unwrap()
      .calls
      .iter()
      .filter(|(m, p)| *m == method && p == path)
      .count()
  }

  pub fn list_calls(&self) -> usize {
    self.count(Method::Get, "/jobs")
  }

  pub fn status_of(&self, id: &str) -> Option<String> {
    self
      .state
      .lock()
      .unwrap()
      .jobs
      .iter()
      .find(|j| j.id == id)
      .map(|j| j.status.clone())
  }

  /// Bodies posted to `path`, oldest first.
  pub fn posts(&self, path: &str) -> Vec<Value> {
    self
      .state
      .lock()
      .unwrap()
      .posts
      .iter()
      .filter(|(p, _)| p == path)
      .map(|(_, b)| b.clone())
      .collect()
  }

  fn handle(&self, request: &ApiRequest) -> ApiResponse {
    let mut state = self.state.lock().unwrap();
    state.calls.push((request.method, request.path.clone()));

    if let Some(status) = state.status_overrides.get(&request.path) {
      return respond(*status, json!({}));
    }

    let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
    match (request.method, segments.as_slice()) {
      (Method::Get, ["jobs"]) => {
        let param = |name: &str| {
          request
            .query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
        };
        let status = param("status");
        let technician = param("technician_id");
        let offset: usize = param("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
        let limit: usize = param("limit").and_then(|v| v.parse().ok()).unwrap_or(20);

        let matching: Vec<&JobDetail> = state
          .jobs
          .iter()
          .filter(|j| status.as_ref().map_or(true, |s| &j.status == s))
          .filter(|j| technician.as_ref().map_or(true, |t| j.assignee.as_ref() == Some(t)))
          .collect();
        let total = matching.len();
        let page: Vec<Value> = matching
          .iter()
          .skip(offset)
          .take(limit)
          .map(|j| serde_json::to_value(j.summary()).unwrap())
          .collect();
        let end = offset + page.len();
        let has_more = end < total;
        respond(
          200,
          json!({
            "jobs": page,
            "total": total,
            "hasMore": has_more,
            "nextOffset": if has_more { Some(end) } else { None },
          }),
        )
      }
      (Method::Get, ["jobs", id]) => match state.jobs.iter().find(|j| j.id == *id) {
        Some(job) => respond(200, serde_json::to_value(job).unwrap()),
        None => respond(404, json!({ "error": "not found" })),
      },
      (Method::Put, ["jobs", id, "status"]) => {
        let id = id.to_string();
        if state.failing_status.contains(&id) {
          return respond(500, json!({ "error": "boom" }));
        }
        let status = request
          .body
          .as_ref()
          .and_then(|b| b.get("status"))
          .and_then(Value::as_str)
          .map(String::from);
        match (state.jobs.iter_mut().find(|j| j.id == id), status) {
          (Some(job), Some(status)) => {
            job.status = status;
            respond(200, json!({ "ok": true }))
          }
          (None, _) => respond(404, json!({ "error": "not found" })),
          (_, None) => respond(400, json!({ "error": "status required" })),
        }
      }
      (Method::Post, _) => {
        let body = request.body.clone().unwrap_or(Value::Null);
        state.posts.push((request.path.clone(), body));
        respond(200, json!({ "ok": true }))
      }
      _ => respond(404, json!({ "error": "no route" })),
    }
  }
}

impl Transport for FakeApi {
  fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, FetchError>> {
    Box::pin(async move {
      let delay = self.state.lock().unwrap().delay;
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      if !self.online.load(Ordering::SeqCst) {
        return Err(FetchError::Network("connection refused".into()));
      }
      Ok(self.handle(&request))
    })
  }
}

fn respond(status: u16, body: Value) -> ApiResponse {
  ApiResponse {
    status,
    body: serde_json::to_vec(&body).unwrap(),
  }
}

pub fn job(id: &str, status: &str) -> JobDetail {
  JobDetail {
    id: id.to_string(),
    title: format!("Job {}", id),
    description: None,
    status: status.to_string(),
    priority: Some("normal".into()),
    date: Some("2026-10-18".into()),
    work_type: Some("repair".into()),
    estimated_duration: Some(60),
    assignee: Some("T1".into()),
    client: ClientContact {
      name: format!("Client {}", id),
      ..ClientContact::default()
    },
    appointment: Appointment::default(),
    location: None,
    photos: Vec::new(),
    notes: Vec::new(),
    materials: Vec::new(),
  }
}

/// `count` jobs named J1..Jn, all with `status`.
pub fn jobs(count: usize, status: &str) -> Vec<JobDetail> {
  (1..=count).map(|i| job(&format!("J{}", i), status)).collect()
}
