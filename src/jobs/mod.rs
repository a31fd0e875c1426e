//! Jobs feature: wire types, the Jobs API client, cache keys, the offline
//! dataset, and the sync service that ties them to the cache.

pub mod api_types;
pub mod cache;
pub mod client;
pub mod fallback;
pub mod feed;
pub mod sync;
pub mod types;

pub use cache::JobQueryKey;
pub use client::JobsClient;
pub use feed::JobFeed;
pub use sync::{DataSource, DetailResult, JobSyncService, PageResult, WriteOutcome, DEFAULT_DRAIN_INTERVAL};
pub use types::{
  Appointment, ClientContact, GeoPoint, JobDetail, JobFilters, JobPage, JobSummary, Material,
  DEFAULT_PAGE_SIZE,
};
