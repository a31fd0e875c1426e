//! Serde-deserializable types matching Jobs API responses.
//!
//! These types are separate from domain types so that loosely-typed server
//! payloads deserialize cleanly while domain types stay strict.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::{
  Appointment, ClientContact, GeoPoint, JobDetail, JobPage, JobSummary, Material,
};

// ============================================================================
// Job list endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiJobsResponse {
  #[serde(default)]
  pub jobs: Vec<ApiJob>,
  #[serde(default)]
  pub total: u64,
  #[serde(default)]
  pub has_more: bool,
  pub next_offset: Option<u32>,
}

impl From<ApiJobsResponse> for JobPage {
  fn from(r: ApiJobsResponse) -> Self {
    JobPage {
      jobs: r.jobs.into_iter().map(ApiJob::into_summary).collect(),
      total: r.total,
      has_more: r.has_more,
      next_offset: r.next_offset,
    }
  }
}

// ============================================================================
// Job entity - shared by list and detail endpoints
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiClient {
  #[serde(default)]
  pub name: String,
  pub phone: Option<String>,
  pub email: Option<String>,
  pub address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAppointment {
  pub scheduled_start: Option<String>,
  pub scheduled_end: Option<String>,
  pub arrival_window: Option<String>,
  #[serde(default)]
  pub confirmed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiLocation {
  pub lat: f64,
  #[serde(alias = "lon", alias = "longitude")]
  pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct ApiMaterial {
  pub name: String,
  #[serde(default)]
  pub quantity: f64,
  pub unit: Option<String>,
}

/// Notes arrive either as one string or as a list of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiNotes {
  One(String),
  Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiJob {
  pub id: String,
  #[serde(default)]
  pub title: String,
  pub description: Option<String>,
  #[serde(default)]
  pub status: String,
  pub priority: Option<String>,
  pub date: Option<String>,
  /// Flat client name used by list payloads
  pub client_name: Option<String>,
  pub client: Option<ApiClient>,
  pub work_type: Option<String>,
  pub estimated_duration: Option<u32>,
  pub assignee: Option<String>,
  pub appointment: Option<ApiAppointment>,
  pub location: Option<ApiLocation>,
  #[serde(default)]
  pub photos: Vec<String>,
  pub notes: Option<ApiNotes>,
  #[serde(default)]
  pub materials: Vec<ApiMaterial>,
  // Anything else the server sends along
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl ApiJob {
  fn client_name(&self) -> Option<String> {
    self.client_name.clone().or_else(|| {
      self
        .client
        .as_ref()
        .map(|c| c.name.clone())
        .filter(|n| !n.is_empty())
    })
  }

  pub fn into_summary(self) -> JobSummary {
    JobSummary {
      client_name: self.client_name(),
      id: self.id,
      title: self.title,
      status: self.status,
      priority: self.priority,
      date: self.date,
      work_type: self.work_type,
      estimated_duration: self.estimated_duration,
      assignee: self.assignee,
    }
  }

  pub fn into_detail(self) -> JobDetail {
    let client_name = self.client_name();
    let client = match self.client {
      Some(c) => ClientContact {
        name: c.name,
        phone: c.phone,
        email: c.email,
        address: c.address,
      },
      None => ClientContact {
        name: client_name.unwrap_or_default(),
        ..ClientContact::default()
      },
    };
    let appointment = self
      .appointment
      .map(|a| Appointment {
        scheduled_start: a.scheduled_start,
        scheduled_end: a.scheduled_end,
        arrival_window: a.arrival_window,
        confirmed: a.confirmed,
      })
      .unwrap_or_default();
    let notes = match self.notes {
      Some(ApiNotes::One(n)) if !n.is_empty() => vec![n],
      Some(ApiNotes::Many(n)) => n,
      _ => Vec::new(),
    };

    JobDetail {
      id: self.id,
      title: self.title,
      description: self.description,
      status: self.status,
      priority: self.priority,
      date: self.date,
      work_type: self.work_type,
      estimated_duration: self.estimated_duration,
      assignee: self.assignee,
      client,
      appointment,
      location: self.location.map(|l| GeoPoint {
        lat: l.lat,
        lng: l.lng,
      }),
      photos: self.photos,
      notes,
      materials: self
        .materials
        .into_iter()
        .map(|m| Material {
          name: m.name,
          quantity: m.quantity,
          unit: m.unit,
        })
        .collect(),
    }
  }
}

// ============================================================================
// Status update body
// ============================================================================

/// Body of `PUT /jobs/{id}/status`: `{ status, ...extra }`.
#[derive(Debug, Serialize)]
pub struct ApiStatusUpdate<'a> {
  pub status: &'a str,
  #[serde(flatten)]
  pub extra: &'a Map<String, Value>,
}
