//! Async query abstraction for data fetching.
//!
//! A `Query<T>` owns a fetcher closure and walks the states
//! `Idle -> Loading -> (Ready | Error)`. Fetches run on spawned tasks and the
//! owner picks up the result by calling `poll()` from its event loop, so the
//! loop never waits on the network.
//!
//! # Example
//!
//! ```ignore
//! let service = sync_service.clone();
//! let mut query = Query::new(move || {
//!     let service = service.clone();
//!     async move { Ok(service.get_page(&JobFilters::default()).await.page) }
//! });
//!
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, re-render
//! }
//! ```

use std::future::Future;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// The state of a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query completed and holds data
  Ready(T),
  /// Query failed with an error
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_ready(&self) -> bool {
    matches!(self, QueryState::Ready(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Ready(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, String>> + Send + Sync>;

struct InFlight<T> {
  rx: oneshot::Receiver<Result<T, String>>,
  task: JoinHandle<()>,
}

/// Async query for data fetching with state management.
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  in_flight: Option<InFlight<T>>,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query. The fetcher is called on every `fetch()`/`refetch()`.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      in_flight: None,
    }
  }

  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  /// Start fetching unless a fetch is already running.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch();
  }

  /// Cancel any running fetch and start a new one.
  ///
  /// The cancelled fetch's result is never observed.
  pub fn refetch(&mut self) {
    self.cancel();
    self.start_fetch();
  }

  /// Poll for the result of a running fetch.
  ///
  /// Returns `true` if the state changed. Call this from the event loop tick.
  pub fn poll(&mut self) -> bool {
    let Some(in_flight) = self.in_flight.as_mut() else {
      return false;
    };

    match in_flight.rx.try_recv() {
      Ok(Ok(data)) => {
        self.state = QueryState::Ready(data);
        self.in_flight = None;
        true
      }
      Ok(Err(error)) => {
        self.state = QueryState::Error(error);
        self.in_flight = None;
        true
      }
      Err(oneshot::error::TryRecvError::Empty) => false,
      Err(oneshot::error::TryRecvError::Closed) => {
        // Task ended without sending (panicked or aborted)
        self.state = QueryState::Error("Query was cancelled".to_string());
        self.in_flight = None;
        true
      }
    }
  }

  /// Move the data out, leaving the query idle.
  pub fn take(&mut self) -> Option<T> {
    match std::mem::replace(&mut self.state, QueryState::Idle) {
      QueryState::Ready(data) => Some(data),
      other => {
        self.state = other;
        None
      }
    }
  }

  fn cancel(&mut self) {
    if let Some(in_flight) = self.in_flight.take() {
      in_flight.task.abort();
    }
  }

  fn start_fetch(&mut self) {
    let (tx, rx) = oneshot::channel();
    let future = (self.fetcher)();
    let task = tokio::spawn(async move {
      // Receiver may have been dropped by a refetch
      let _ = tx.send(future.await);
    });
    self.in_flight = Some(InFlight { rx, task });
    self.state = QueryState::Loading;
  }
}

impl<T> Drop for Query<T> {
  fn drop(&mut self) {
    if let Some(in_flight) = self.in_flight.take() {
      in_flight.task.abort();
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("in_flight", &self.in_flight.is_some())
      .finish_non_exhaustive()
  }
}
