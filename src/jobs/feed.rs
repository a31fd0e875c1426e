//! Paginated job list with client-side offset tracking.

use serde_json::{Map, Value};

use crate::query::{Query, QueryState};

use super::sync::{DataSource, JobSyncService, WriteOutcome};
use super::types::{JobFilters, JobPage, JobSummary};

#[derive(Debug)]
struct Loaded {
  offset: u32,
  page: JobPage,
  source: DataSource,
}

/// The jobs a list view is showing, plus where to continue from.
///
/// The first page goes through the cache-first path; every "load more" is a
/// foreground read of the next offset.
pub struct JobFeed {
  service: JobSyncService,
  filters: JobFilters,
  jobs: Vec<JobSummary>,
  next_offset: Option<u32>,
  source: Option<DataSource>,
  query: Option<Query<Loaded>>,
}

impl JobFeed {
  pub fn new(service: JobSyncService, filters: JobFilters) -> Self {
    Self {
      service,
      filters: filters.at_offset(0),
      jobs: Vec::new(),
      next_offset: None,
      source: None,
      query: None,
    }
  }

  /// Start loading the first page, replacing whatever is shown.
  pub fn load(&mut self) {
    self.start(0, false);
  }

  /// Drop all cached lists and load the first page from the network.
  pub fn refresh(&mut self) {
    self.start(0, true);
  }

  /// Start loading the next page. Returns `false` if there is none or a
  /// load is already running.
  pub fn load_more(&mut self) -> bool {
    if self.is_loading() {
      return false;
    }
    match self.next_offset {
      Some(offset) => {
        self.start(offset, false);
        true
      }
      None => false,
    }
  }

  /// Pick up a finished load. Returns `true` if the visible list changed.
  pub fn poll(&mut self) -> bool {
    let Some(query) = self.query.as_mut() else {
      return false;
    };
    if !query.poll() {
      return false;
    }

    match query.take() {
      Some(loaded) => {
        if loaded.offset == 0 {
          self.jobs = loaded.page.jobs;
        } else {
          self.jobs.extend(loaded.page.jobs);
        }
        self.next_offset = if loaded.page.has_more {
          loaded
            .page
            .next_offset
            .or(Some(self.jobs.len() as u32))
        } else {
          None
        };
        self.source = Some(loaded.source);
        self.query = None;
        true
      }
      // Reads degrade instead of failing, so only a cancelled task lands here
      None => false,
    }
  }

  pub fn state(&self) -> QueryState<()> {
    match &self.query {
      Some(q) if q.is_loading() => QueryState::Loading,
      Some(q) => match q.state().error() {
        Some(e) => QueryState::Error(e.to_string()),
        None => QueryState::Idle,
      },
      None if self.source.is_some() => QueryState::Ready(()),
      None => QueryState::Idle,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.query.as_ref().is_some_and(|q| q.is_loading())
  }

  pub fn jobs(&self) -> &[JobSummary] {
    &self.jobs
  }

  pub fn has_more(&self) -> bool {
    self.next_offset.is_some()
  }

  pub fn source(&self) -> Option<DataSource> {
    self.source
  }

  pub fn filters(&self) -> &JobFilters {
    &self.filters
  }

  pub fn service(&self) -> &JobSyncService {
    &self.service
  }

  /// Optimistically change a visible job's status and sync it.
  pub async fn update_status(
    &mut self,
    id: &str,
    status: &str,
    extra: Map<String, Value>,
  ) -> WriteOutcome {
    self
      .service
      .update_status(id, status, extra, &mut self.jobs)
      .await
  }

  fn start(&mut self, offset: u32, force: bool) {
    let service = self.service.clone();
    let filters = self.filters.at_offset(offset);

    let mut query = Query::new(move || {
      let service = service.clone();
      let filters = filters.clone();
      async move {
        let result = if force {
          service.force_refresh(&filters).await
        } else {
          service.get_page(&filters).await
        };
        Ok(Loaded {
          offset: filters.offset,
          page: result.page,
          source: result.source,
        })
      }
    });
    query.fetch();
    // Replacing a running query cancels it
    self.query = Some(query);
  }
}
