use std::time::Duration;

use serde_json::{Map, Value};

use crate::net::{
  encoded_path, fetch_with_timeout, ApiRequest, FetchError, SharedTransport, DEFAULT_TIMEOUT,
};

use super::api_types::{ApiJob, ApiJobsResponse, ApiStatusUpdate};
use super::types::{JobDetail, JobFilters, JobPage};

/// Jobs API client. Every call is bounded by the client's timeout.
#[derive(Clone)]
pub struct JobsClient {
  transport: SharedTransport,
  timeout: Duration,
}

impl JobsClient {
  pub fn new(transport: SharedTransport) -> Self {
    Self {
      transport,
      timeout: DEFAULT_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// `GET /jobs` for one page
  pub async fn list_jobs(&self, filters: &JobFilters) -> Result<JobPage, FetchError> {
    let filters = filters.normalized();
    let request = ApiRequest::get("/jobs")
      .param("technician_id", filters.technician_id.as_deref())
      .param("status", filters.status.as_deref())
      .param("date_from", filters.date_from.as_deref())
      .param("date_to", filters.date_to.as_deref())
      .param("priority", filters.priority.as_deref())
      .param("limit", Some(filters.limit))
      .param("offset", Some(filters.offset));

    let response = fetch_with_timeout(self.transport.as_ref(), request, self.timeout).await?;
    let body: ApiJobsResponse = response.json()?;
    Ok(body.into())
  }

  /// `GET /jobs/{id}`
  pub async fn get_job(&self, id: &str) -> Result<JobDetail, FetchError> {
    let request = ApiRequest::get(encoded_path(&["jobs", id])?);
    let response = fetch_with_timeout(self.transport.as_ref(), request, self.timeout).await?;
    let job: ApiJob = response.json()?;
    Ok(job.into_detail())
  }

  /// `PUT /jobs/{id}/status` with `{ status, ...extra }`
  pub async fn update_status(
    &self,
    id: &str,
    status: &str,
    extra: &Map<String, Value>,
  ) -> Result<(), FetchError> {
    let body = serde_json::to_value(ApiStatusUpdate { status, extra })
      .map_err(|e| FetchError::Decode(e.to_string()))?;
    let request = ApiRequest::put(encoded_path(&["jobs", id, "status"])?, body);
    fetch_with_timeout(self.transport.as_ref(), request, self.timeout).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::Method;
  use crate::test_support::{job, FakeApi};
  use std::sync::Arc;

  #[tokio::test]
  async fn test_reserved_characters_in_id_are_escaped() {
    let api = FakeApi::new();
    let client = JobsClient::new(Arc::new(api.clone()));

    let _ = client.get_job("J1?x=1#frag").await;
    let _ = client.update_status("a/b", "completed", &Map::new()).await;

    assert_eq!(api.count(Method::Get, "/jobs/J1%3Fx=1%23frag"), 1);
    assert_eq!(api.count(Method::Put, "/jobs/a%2Fb/status"), 1);
    assert_eq!(api.count(Method::Put, "/jobs/a/b/status"), 0);
  }

  #[tokio::test]
  async fn test_plain_ids_are_unchanged() {
    let api = FakeApi::with_jobs(vec![job("J7", "assigned")]);
    let client = JobsClient::new(Arc::new(api.clone()));

    assert_eq!(client.get_job("J7").await.unwrap().id, "J7");
    client.update_status("J7", "completed", &Map::new()).await.unwrap();
    assert_eq!(api.status_of("J7").as_deref(), Some("completed"));
  }
}
