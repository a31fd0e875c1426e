use serde::{Deserialize, Serialize};

/// Default page size for job lists
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Summary of a job for list views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
  pub id: String,
  pub title: String,
  pub status: String,
  pub priority: Option<String>,
  pub date: Option<String>,
  pub client_name: Option<String>,
  pub work_type: Option<String>,
  /// Estimated duration in minutes
  pub estimated_duration: Option<u32>,
  pub assignee: Option<String>,
}

/// Client contact block of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContact {
  pub name: String,
  pub phone: Option<String>,
  pub email: Option<String>,
  pub address: Option<String>,
}

/// Appointment metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
  pub scheduled_start: Option<String>,
  pub scheduled_end: Option<String>,
  pub arrival_window: Option<String>,
  pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
  pub lat: f64,
  pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
  pub name: String,
  pub quantity: f64,
  pub unit: Option<String>,
}

/// Full job details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
  pub id: String,
  pub title: String,
  pub description: Option<String>,
  pub status: String,
  pub priority: Option<String>,
  pub date: Option<String>,
  pub work_type: Option<String>,
  pub estimated_duration: Option<u32>,
  pub assignee: Option<String>,
  pub client: ClientContact,
  pub appointment: Appointment,
  pub location: Option<GeoPoint>,
  pub photos: Vec<String>,
  pub notes: Vec<String>,
  pub materials: Vec<Material>,
}

impl JobDetail {
  pub fn summary(&self) -> JobSummary {
    JobSummary {
      id: self.id.clone(),
      title: self.title.clone(),
      status: self.status.clone(),
      priority: self.priority.clone(),
      date: self.date.clone(),
      client_name: Some(self.client.name.clone()).filter(|n| !n.is_empty()),
      work_type: self.work_type.clone(),
      estimated_duration: self.estimated_duration,
      assignee: self.assignee.clone(),
    }
  }
}

/// Filters for a job list query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobFilters {
  pub technician_id: Option<String>,
  pub status: Option<String>,
  pub date_from: Option<String>,
  pub date_to: Option<String>,
  pub priority: Option<String>,
  pub limit: u32,
  pub offset: u32,
}

impl Default for JobFilters {
  fn default() -> Self {
    Self {
      technician_id: None,
      status: None,
      date_from: None,
      date_to: None,
      priority: None,
      limit: DEFAULT_PAGE_SIZE,
      offset: 0,
    }
  }
}

impl JobFilters {
  pub fn with_status(mut self, status: impl Into<String>) -> Self {
    self.status = Some(status.into());
    self
  }

  pub fn with_technician(mut self, technician_id: impl Into<String>) -> Self {
    self.technician_id = Some(technician_id.into());
    self
  }

  /// Same filters, different page.
  pub fn at_offset(&self, offset: u32) -> Self {
    Self {
      offset,
      ..self.clone()
    }
  }

  pub fn is_first_page(&self) -> bool {
    self.offset == 0
  }

  /// Trimmed copy with blank filters removed.
  ///
  /// This is the form both sent to the server and used for the cache key, so
  /// two filter sets share a key exactly when they make the same request.
  pub fn normalized(&self) -> Self {
    fn clean(value: &Option<String>) -> Option<String> {
      value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
    }
    Self {
      technician_id: clean(&self.technician_id),
      status: clean(&self.status),
      date_from: clean(&self.date_from),
      date_to: clean(&self.date_to),
      priority: clean(&self.priority),
      limit: self.limit,
      offset: self.offset,
    }
  }
}

/// One page of jobs
#[derive(Debug, Clone, PartialEq)]
pub struct JobPage {
  pub jobs: Vec<JobSummary>,
  pub total: u64,
  pub has_more: bool,
  pub next_offset: Option<u32>,
}

impl JobPage {
  /// Rebuild page metadata for a list served without the server's envelope.
  ///
  /// A full page is assumed to have a successor.
  pub fn from_items(jobs: Vec<JobSummary>, filters: &JobFilters) -> Self {
    let len = jobs.len() as u32;
    let has_more = filters.limit > 0 && len >= filters.limit;
    Self {
      total: u64::from(filters.offset + len),
      has_more,
      next_offset: has_more.then_some(filters.offset + len),
      jobs,
    }
  }
}
