//! Job sync service: cache-first reads with refresh-behind, optimistic writes
//! with an offline queue, and the periodic queue drain.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheManager, Lookup, MutationAction, QueuedMutation};
use crate::net::FetchError;

use super::cache::JobQueryKey;
use super::client::JobsClient;
use super::fallback::{offline_detail, offline_page};
use super::types::{JobDetail, JobFilters, JobPage, JobSummary};

/// Default interval between queue drains
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Where the data handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
  /// Fresh data from the network
  Network,
  /// Cache entry within its TTL
  Cache,
  /// Expired cache entry, served because the network failed
  StaleCache,
  /// Static sample data, served because nothing else was available
  OfflineFallback,
}

impl DataSource {
  /// Whether the caller should show a "using cached/offline data" hint.
  pub fn is_degraded(self) -> bool {
    matches!(self, DataSource::StaleCache | DataSource::OfflineFallback)
  }
}

/// Result of a page read.
#[derive(Debug)]
pub struct PageResult {
  pub page: JobPage,
  pub source: DataSource,
  /// Background refresh started by a cache hit on the first page.
  ///
  /// Dropping the handle does not cancel the refresh.
  pub refresh: Option<JoinHandle<()>>,
}

/// Result of a detail read.
#[derive(Debug, Clone)]
pub struct DetailResult {
  pub job: JobDetail,
  pub source: DataSource,
}

/// Outcome of an optimistic write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
  /// The remote system accepted the change
  Confirmed,
  /// The change is queued for replay; the optimistic state stands
  Unconfirmed {
    mutation_id: String,
    reason: FetchError,
  },
}

impl WriteOutcome {
  pub fn is_confirmed(&self) -> bool {
    matches!(self, WriteOutcome::Confirmed)
  }
}

/// Jobs data access with caching and offline support.
///
/// This wraps the Jobs API client and the cache manager. Reads never fail
/// because of the network and writes are never lost because of it.
#[derive(Clone)]
pub struct JobSyncService {
  client: JobsClient,
  cache: Arc<CacheManager>,
}

impl JobSyncService {
  pub fn new(client: JobsClient, cache: Arc<CacheManager>) -> Self {
    Self { client, cache }
  }

  pub fn cache(&self) -> &Arc<CacheManager> {
    &self.cache
  }

  /// Epoch ms of the last successful read or drain, for display.
  pub fn last_sync(&self) -> Option<i64> {
    self.cache.last_sync()
  }

  // ==========================================================================
  // Read path
  // ==========================================================================

  /// Read one page of jobs.
  ///
  /// 1. First page with a fresh cache entry: return it right away and refresh
  ///    the entry in the background
  /// 2. Otherwise fetch from the network and cache the result
  /// 3. On network failure, return the cached entry even if stale
  /// 4. With no cache either, return the offline dataset
  pub async fn get_page(&self, filters: &JobFilters) -> PageResult {
    let filters = &filters.normalized();
    let query_key = JobQueryKey::Page(filters);
    let key = query_key.cache_hash();
    let cached = self.cache.lookup_list::<JobSummary>(&key);

    if filters.is_first_page() {
      if let Lookup::Fresh(entry) = cached {
        debug!(query = %query_key.description(), "serving cached first page");
        let refresh = self.spawn_refresh(filters.clone(), key);
        return PageResult {
          page: JobPage::from_items(entry.payload, filters),
          source: DataSource::Cache,
          refresh: Some(refresh),
        };
      }
    }

    match self.client.list_jobs(filters).await {
      Ok(page) => {
        self.cache.put_list(&key, &page.jobs);
        self.cache.mark_synced();
        PageResult {
          page,
          source: DataSource::Network,
          refresh: None,
        }
      }
      Err(e) => {
        warn!(query = %query_key.description(), error = %e, "job list fetch failed, falling back");
        let (page, source) = match cached {
          Lookup::Fresh(entry) => (JobPage::from_items(entry.payload, filters), DataSource::Cache),
          Lookup::Stale(entry) => (
            JobPage::from_items(entry.payload, filters),
            DataSource::StaleCache,
          ),
          Lookup::Miss => (offline_page(filters), DataSource::OfflineFallback),
        };
        PageResult {
          page,
          source,
          refresh: None,
        }
      }
    }
  }

  /// Read the page after `filters`, always from the network first.
  pub async fn load_more(&self, filters: &JobFilters, next_offset: u32) -> PageResult {
    self.get_page(&filters.at_offset(next_offset)).await
  }

  /// Drop every cached list, then read.
  pub async fn force_refresh(&self, filters: &JobFilters) -> PageResult {
    self.cache.invalidate_all_lists();
    self.get_page(filters).await
  }

  /// Read one job's details: fresh cache, then network, then stale cache,
  /// then the offline dataset.
  pub async fn get_job(&self, id: &str) -> Result<DetailResult, FetchError> {
    let cached = self.cache.lookup_detail::<JobDetail>(id);
    if let Lookup::Fresh(entry) = cached {
      return Ok(DetailResult {
        job: entry.payload,
        source: DataSource::Cache,
      });
    }

    match self.client.get_job(id).await {
      Ok(job) => {
        self.cache.put_detail(&job);
        self.cache.mark_synced();
        Ok(DetailResult {
          job,
          source: DataSource::Network,
        })
      }
      Err(e) => {
        warn!(id, error = %e, "job detail fetch failed, falling back");
        if let Some(entry) = cached.into_any() {
          return Ok(DetailResult {
            job: entry.payload,
            source: DataSource::StaleCache,
          });
        }
        match offline_detail(id) {
          Some(job) => Ok(DetailResult {
            job,
            source: DataSource::OfflineFallback,
          }),
          None => Err(e),
        }
      }
    }
  }

  fn spawn_refresh(&self, filters: JobFilters, key: String) -> JoinHandle<()> {
    let client = self.client.clone();
    let cache = Arc::clone(&self.cache);

    tokio::spawn(async move {
      match client.list_jobs(&filters).await {
        Ok(page) => {
          cache.put_list(&key, &page.jobs);
          cache.mark_synced();
          debug!(count = page.jobs.len(), "background refresh stored first page");
        }
        Err(e) => {
          // The caller already has data; nothing to surface
          warn!(error = %e, "background refresh failed");
        }
      }
    })
  }

  // ==========================================================================
  // Write path
  // ==========================================================================

  /// Change a job's status.
  ///
  /// `visible` is the list the caller is showing; it is updated before the
  /// network call. On failure the change is queued and the caller gets
  /// `Unconfirmed`, which is not an error: the optimistic state stands until
  /// a later sync corrects it.
  pub async fn update_status(
    &self,
    id: &str,
    status: &str,
    extra: Map<String, Value>,
    visible: &mut [JobSummary],
  ) -> WriteOutcome {
    for job in visible.iter_mut().filter(|j| j.id == id) {
      job.status = status.to_string();
    }

    match self.client.update_status(id, status, &extra).await {
      Ok(()) => {
        // Lists keep their own TTL; the visible one is already up to date
        self.cache.remove_detail::<JobDetail>(id);
        info!(id, status, "status update confirmed");
        WriteOutcome::Confirmed
      }
      Err(reason) => {
        let mutation = QueuedMutation::update_status(id, status, extra, self.cache.now_ms());
        let mutation_id = mutation.id.clone();
        self.cache.enqueue(mutation);
        warn!(id, status, error = %reason, "status update queued for replay");
        WriteOutcome::Unconfirmed {
          mutation_id,
          reason,
        }
      }
    }
  }

  /// Send one queued mutation through the same path as a live write.
  async fn replay(&self, mutation: QueuedMutation) -> Result<(), FetchError> {
    match &mutation.action {
      MutationAction::UpdateStatus { status, extra } => {
        self
          .client
          .update_status(&mutation.target_id, status, extra)
          .await?;
        self.cache.remove_detail::<JobDetail>(&mutation.target_id);
      }
    }
    Ok(())
  }

  /// Replay the offline queue once. Returns the number of confirmed mutations.
  pub async fn drain_queue(&self) -> usize {
    let confirmed = self
      .cache
      .drain_queue(|mutation| {
        let this = self.clone();
        async move { this.replay(mutation).await }
      })
      .await;
    if confirmed > 0 {
      self.cache.mark_synced();
    }
    confirmed
  }

  /// Spawn the periodic queue drain.
  ///
  /// Failed mutations are retried every interval without limit or backoff.
  /// Abort the returned handle to stop the task.
  pub fn spawn_queue_drain(&self, interval: Duration) -> JoinHandle<()> {
    let this = self.clone();

    tokio::spawn(async move {
      info!(?interval, "starting queue drain task");

      loop {
        tokio::time::sleep(interval).await;

        let pending = this.cache.queue_len();
        if pending == 0 {
          debug!("queue drain: nothing pending");
          continue;
        }
        let confirmed = this.drain_queue().await;
        debug!(pending, confirmed, "queue drain tick");
      }
    })
  }
}
