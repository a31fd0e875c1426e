//! Time-bounded network access.
//!
//! Every request goes through [`fetch_with_timeout`], which races the call
//! against a deadline. When the deadline wins the in-flight future is dropped,
//! which cancels it, and whatever it would have produced is never observed.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default upper bound for ad hoc calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(8_000);

/// Upper bound for session/liveness calls
pub const SESSION_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Why a request did not produce a usable response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  #[error("network failure: {0}")]
  Network(String),

  #[error("HTTP error {status}")]
  Http { status: u16 },

  #[error("invalid response body: {0}")]
  Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
}

/// Transport-independent description of one API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl ApiRequest {
  pub fn get(path: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      path: path.into(),
      query: Vec::new(),
      body: None,
    }
  }

  pub fn post(path: impl Into<String>, body: Value) -> Self {
    Self {
      method: Method::Post,
      path: path.into(),
      query: Vec::new(),
      body: Some(body),
    }
  }

  pub fn put(path: impl Into<String>, body: Value) -> Self {
    Self {
      method: Method::Put,
      path: path.into(),
      query: Vec::new(),
      body: Some(body),
    }
  }

  /// Add a query parameter, skipping empty values.
  pub fn param(mut self, name: &str, value: Option<impl ToString>) -> Self {
    if let Some(v) = value {
      self.query.push((name.to_string(), v.to_string()));
    }
    self
  }
}

/// Absolute path built from segments, each percent-encoded so that an id
/// containing `/`, `?`, `#` or `%` stays inside its own segment.
pub fn encoded_path(segments: &[&str]) -> Result<String, FetchError> {
  let mut url =
    Url::parse("http://localhost/").map_err(|e| FetchError::Network(e.to_string()))?;
  url
    .path_segments_mut()
    .map_err(|_| FetchError::Network("cannot build request path".into()))?
    .clear()
    .extend(segments);
  Ok(url.path().to_string())
}

/// Raw response as seen by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub status: u16,
  pub body: Vec<u8>,
}

impl ApiResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
    serde_json::from_slice(&self.body).map_err(|e| FetchError::Decode(e.to_string()))
  }
}

/// Something that can carry an [`ApiRequest`] to the remote system.
///
/// Implementations report connection-level problems as `FetchError::Network`
/// and return every HTTP response, whatever its status, as `Ok`.
pub trait Transport: Send + Sync {
  fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, FetchError>>;
}

pub type SharedTransport = Arc<dyn Transport>;

/// Run `request` with a hard deadline and classify the outcome.
pub async fn fetch_with_timeout(
  transport: &dyn Transport,
  request: ApiRequest,
  timeout: Duration,
) -> Result<ApiResponse, FetchError> {
  let path = request.path.clone();
  let response = match tokio::time::timeout(timeout, transport.execute(request)).await {
    Ok(result) => result?,
    Err(_) => {
      debug!(path = %path, ?timeout, "request cancelled by timeout");
      return Err(FetchError::Timeout(timeout));
    }
  };

  if response.is_success() {
    Ok(response)
  } else {
    Err(FetchError::Http {
      status: response.status,
    })
  }
}

/// HTTP transport backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &str) -> Result<Self> {
    let mut base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API base URL '{}': {}", base_url, e))?;
    // Keep any path prefix when joining relative endpoints
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }

    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  fn url_for(&self, request: &ApiRequest) -> Result<Url, FetchError> {
    let mut url = self
      .base_url
      .join(request.path.trim_start_matches('/'))
      .map_err(|e| FetchError::Network(format!("bad url {}: {}", request.path, e)))?;
    if !request.query.is_empty() {
      url.query_pairs_mut().extend_pairs(request.query.iter());
    }
    Ok(url)
  }
}

impl Transport for HttpTransport {
  fn execute(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, FetchError>> {
    Box::pin(async move {
      let url = self.url_for(&request)?;
      let builder = match request.method {
        Method::Get => self.client.get(url),
        Method::Post => self.client.post(url),
        Method::Put => self.client.put(url),
      };
      let builder = match &request.body {
        Some(body) => builder.json(body),
        None => builder,
      };

      let response = builder
        .send()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;
      let status = response.status().as_u16();
      let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;

      Ok(ApiResponse {
        status,
        body: body.to_vec(),
      })
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};

  struct Scripted {
    delay: Duration,
    status: u16,
    finished: Arc<AtomicBool>,
  }

  impl Transport for Scripted {
    fn execute(&self, _request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, FetchError>> {
      Box::pin(async move {
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(ApiResponse {
          status: self.status,
          body: b"{}".to_vec(),
        })
      })
    }
  }

  struct Unreachable;

  impl Transport for Unreachable {
    fn execute(&self, _request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, FetchError>> {
      Box::pin(async { Err(FetchError::Network("connection refused".into())) })
    }
  }

  fn scripted(delay_ms: u64, status: u16) -> (Scripted, Arc<AtomicBool>) {
    let finished = Arc::new(AtomicBool::new(false));
    (
      Scripted {
        delay: Duration::from_millis(delay_ms),
        status,
        finished: finished.clone(),
      },
      finished,
    )
  }

  #[tokio::test]
  async fn test_success() {
    let (t, _) = scripted(0, 204);
    let resp = fetch_with_timeout(&t, ApiRequest::get("/jobs"), DEFAULT_TIMEOUT)
      .await
      .unwrap();
    assert_eq!(resp.status, 204);
  }

  #[tokio::test]
  async fn test_timeout_cancels_call() {
    let (t, finished) = scripted(200, 200);
    let err = fetch_with_timeout(&t, ApiRequest::get("/jobs"), Duration::from_millis(20))
      .await
      .unwrap_err();
    assert_eq!(err, FetchError::Timeout(Duration::from_millis(20)));

    // The dropped call never completes
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!finished.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_http_error_status() {
    let (t, _) = scripted(0, 503);
    let err = fetch_with_timeout(&t, ApiRequest::get("/jobs"), DEFAULT_TIMEOUT)
      .await
      .unwrap_err();
    assert_eq!(err, FetchError::Http { status: 503 });
  }

  #[tokio::test]
  async fn test_network_failure() {
    let err = fetch_with_timeout(&Unreachable, ApiRequest::get("/jobs"), DEFAULT_TIMEOUT)
      .await
      .unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
  }

  #[test]
  fn test_param_skips_none() {
    let req = ApiRequest::get("/jobs")
      .param("status", Some("assigned"))
      .param("priority", None::<String>)
      .param("limit", Some(20));
    assert_eq!(
      req.query,
      vec![
        ("status".to_string(), "assigned".to_string()),
        ("limit".to_string(), "20".to_string())
      ]
    );
  }

  #[test]
  fn test_encoded_path_keeps_ids_in_one_segment() {
    assert_eq!(encoded_path(&["jobs", "J1"]).unwrap(), "/jobs/J1");
    assert_eq!(
      encoded_path(&["jobs", "a/b?c#d", "status"]).unwrap(),
      "/jobs/a%2Fb%3Fc%23d/status"
    );

    let t = HttpTransport::new("https://api.example.com/v1").unwrap();
    let path = encoded_path(&["jobs", "../admin"]).unwrap();
    let url = t.url_for(&ApiRequest::get(path)).unwrap();
    assert_eq!(url.path(), "/v1/jobs/..%2Fadmin");
  }

  #[test]
  fn test_url_keeps_base_path() {
    let t = HttpTransport::new("http://localhost:3001/api").unwrap();
    let url = t
      .url_for(&ApiRequest::get("/jobs/J1").param("x", Some("1 2")))
      .unwrap();
    assert_eq!(url.as_str(), "http://localhost:3001/api/jobs/J1?x=1+2");
  }
}
