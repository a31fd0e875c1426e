//! Static offline dataset.
//!
//! Served only when neither the network nor the cache can answer, so a list
//! view always has something to render. Results built from it are marked
//! `DataSource::OfflineFallback` and must not be mistaken for real jobs.

use super::types::{
  Appointment, ClientContact, GeoPoint, JobDetail, JobFilters, JobPage, Material,
};

fn sample(
  id: &str,
  title: &str,
  status: &str,
  priority: &str,
  client: &str,
  work_type: &str,
  minutes: u32,
) -> JobDetail {
  JobDetail {
    id: id.to_string(),
    title: title.to_string(),
    description: Some("Offline sample job".to_string()),
    status: status.to_string(),
    priority: Some(priority.to_string()),
    date: None,
    work_type: Some(work_type.to_string()),
    estimated_duration: Some(minutes),
    assignee: None,
    client: ClientContact {
      name: client.to_string(),
      ..ClientContact::default()
    },
    appointment: Appointment::default(),
    location: Some(GeoPoint {
      lat: 40.7128,
      lng: -74.006,
    }),
    photos: Vec::new(),
    notes: Vec::new(),
    materials: vec![Material {
      name: "General supplies".to_string(),
      quantity: 1.0,
      unit: None,
    }],
  }
}

/// Every job in the offline dataset.
pub fn offline_jobs() -> Vec<JobDetail> {
  vec![
    sample(
      "offline-1",
      "HVAC maintenance",
      "assigned",
      "high",
      "Sample Client A",
      "maintenance",
      90,
    ),
    sample(
      "offline-2",
      "Water heater inspection",
      "assigned",
      "normal",
      "Sample Client B",
      "inspection",
      45,
    ),
    sample(
      "offline-3",
      "Electrical panel repair",
      "in_progress",
      "urgent",
      "Sample Client C",
      "repair",
      120,
    ),
    sample(
      "offline-4",
      "Thermostat install",
      "completed",
      "low",
      "Sample Client D",
      "installation",
      30,
    ),
  ]
}

/// Offline page matching the status and priority filters.
///
/// Technician and date filters are ignored since sample jobs have neither.
pub fn offline_page(filters: &JobFilters) -> JobPage {
  let matching: Vec<_> = offline_jobs()
    .into_iter()
    .filter(|j| filters.status.as_ref().map_or(true, |s| &j.status == s))
    .filter(|j| {
      filters
        .priority
        .as_ref()
        .map_or(true, |p| j.priority.as_ref() == Some(p))
    })
    .collect();

  let total = matching.len() as u64;
  let jobs: Vec<_> = matching
    .iter()
    .skip(filters.offset as usize)
    .take(filters.limit as usize)
    .map(JobDetail::summary)
    .collect();
  let end = filters.offset as u64 + jobs.len() as u64;
  let has_more = end < total;

  JobPage {
    jobs,
    total,
    has_more,
    next_offset: has_more.then_some(end as u32),
  }
}

pub fn offline_detail(id: &str) -> Option<JobDetail> {
  offline_jobs().into_iter().find(|j| j.id == id)
}
