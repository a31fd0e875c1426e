use crate::commands::{self, ShellCommand};
use crate::event::{Event, EventHandler};
use chrono::{DateTime, Local};
use color_eyre::{eyre::eyre, Result};
use fieldsync::cache::{CacheManager, DurableStore, NoopBackend, SqliteBackend};
use fieldsync::clock::{SharedClock, SystemClock};
use fieldsync::config::{CacheConfig, Config};
use fieldsync::jobs::{
  DataSource, JobFeed, JobFilters, JobSummary, JobSyncService, JobsClient, WriteOutcome,
};
use fieldsync::net::{HttpTransport, SharedTransport};
use fieldsync::query::QueryState;
use fieldsync::session::{SessionClient, SessionEnd, SessionMonitor, SignalSender};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const TICK_RATE: Duration = Duration::from_millis(100);

/// Wired-up application components
pub struct App {
  config: Config,
  store: DurableStore,
  clock: SharedClock,
  transport: SharedTransport,
  service: JobSyncService,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let transport: SharedTransport = Arc::new(HttpTransport::new(&config.api.base_url)?);
    let clock: SharedClock = Arc::new(SystemClock);
    let store = open_store(&config.cache);

    let cache =
      Arc::new(CacheManager::new(store.clone(), clock.clone()).with_ttl(config.cache.ttl()));
    let client = JobsClient::new(transport.clone()).with_timeout(config.sync.request_timeout());
    let service = JobSyncService::new(client, cache);

    Ok(Self {
      config,
      store,
      clock,
      transport,
      service,
    })
  }

  fn filters(
    &self,
    status: Option<String>,
    priority: Option<String>,
    limit: Option<u32>,
  ) -> JobFilters {
    let mut filters = JobFilters {
      technician_id: self.config.api.technician_id.clone(),
      status,
      priority,
      ..JobFilters::default()
    };
    if let Some(limit) = limit {
      filters.limit = limit;
    }
    filters
  }

  // ==========================================================================
  // One-shot commands
  // ==========================================================================

  pub async fn list_jobs(
    &self,
    status: Option<String>,
    priority: Option<String>,
    limit: Option<u32>,
    refresh: bool,
  ) -> Result<()> {
    let filters = self.filters(status, priority, limit);
    let result = if refresh {
      self.service.force_refresh(&filters).await
    } else {
      self.service.get_page(&filters).await
    };

    print_source(result.source, self.service.last_sync());
    print_jobs(&result.page.jobs);
    if result.page.has_more {
      println!("({} of {} shown)", result.page.jobs.len(), result.page.total);
    }

    // Let the refresh-behind land in the cache before the process exits
    if let Some(handle) = result.refresh {
      let _ = handle.await;
    }
    Ok(())
  }

  pub async fn show_job(&self, id: &str) -> Result<()> {
    let result = self
      .service
      .get_job(id)
      .await
      .map_err(|e| eyre!("Failed to load job {}: {}", id, e))?;
    print_source(result.source, self.service.last_sync());

    let job = result.job;
    println!("{}  {}", job.id, job.title);
    println!("  status:    {}", job.status);
    if let Some(priority) = &job.priority {
      println!("  priority:  {}", priority);
    }
    if let Some(date) = &job.date {
      println!("  date:      {}", date);
    }
    if !job.client.name.is_empty() {
      println!("  client:    {}", job.client.name);
    }
    if let Some(address) = &job.client.address {
      println!("  address:   {}", address);
    }
    if let Some(phone) = &job.client.phone {
      println!("  phone:     {}", phone);
    }
    if let Some(start) = &job.appointment.scheduled_start {
      println!("  scheduled: {}", start);
    }
    if let Some(description) = &job.description {
      println!("\n{}", description);
    }
    for note in &job.notes {
      println!("  - {}", note);
    }
    Ok(())
  }

  pub async fn set_status(&self, id: &str, status: &str, note: Option<String>) -> Result<()> {
    let mut extra = Map::new();
    if let Some(note) = note {
      extra.insert("note".to_string(), Value::String(note));
    }
    let outcome = self.service.update_status(id, status, extra, &mut []).await;
    print_outcome(id, status, &outcome);
    Ok(())
  }

  pub fn show_queue(&self) {
    let pending = self.service.cache().pending();
    if pending.is_empty() {
      println!("No pending writes.");
      return;
    }
    for mutation in pending {
      println!(
        "{}  {} {}  queued {}",
        mutation.id,
        mutation.action.name(),
        mutation.target_id,
        format_ms(mutation.enqueued_at_epoch_ms)
      );
    }
  }

  pub async fn drain(&self) {
    let before = self.service.cache().queue_len();
    let confirmed = self.service.drain_queue().await;
    println!(
      "Replayed {} of {} pending writes; {} still pending.",
      confirmed,
      before,
      self.service.cache().queue_len()
    );
  }

  // ==========================================================================
  // Interactive shell
  // ==========================================================================

  pub async fn run(self) -> Result<()> {
    let technician_id = self.config.technician_id()?.to_string();

    let drain = self
      .service
      .spawn_queue_drain(self.config.sync.drain_interval());

    let session_client = SessionClient::new(self.transport.clone())
      .with_timeout(self.config.session.request_timeout());
    let (end_tx, ends) = mpsc::unbounded_channel();
    let (signals, monitor) = SessionMonitor::new(
      session_client,
      self.store.clone(),
      self.clock.clone(),
      self.config.session.monitor_settings(),
    )
    .with_end_listener(end_tx)
    .spawn();

    let mut shell = Shell {
      feed: JobFeed::new(
        self.service.clone(),
        JobFilters::default().with_technician(technician_id.clone()),
      ),
      signals,
      ends,
      technician_id,
      session_active: false,
      should_quit: false,
    };
    shell.start_session();
    shell.feed.load();
    println!("Loading jobs... type 'help' for commands.");

    let mut events = EventHandler::new(TICK_RATE);
    while !shell.should_quit {
      let Some(event) = events.next().await else {
        break;
      };
      match event {
        Event::Line(line) => shell.handle_line(&line).await,
        Event::Eof => shell.should_quit = true,
        Event::Tick => {
          if shell.feed.poll() {
            shell.render();
          }
          shell.collect_ends();
        }
      }
    }

    if !shell.signals.on_terminating().await {
      warn!("session reconciliation did not finish before exit");
    }
    drain.abort();
    monitor.abort();
    Ok(())
  }
}

/// State of the interactive loop
struct Shell {
  feed: JobFeed,
  signals: SignalSender,
  ends: mpsc::UnboundedReceiver<SessionEnd>,
  technician_id: String,
  session_active: bool,
  should_quit: bool,
}

impl Shell {
  fn start_session(&mut self) {
    self.signals.start_session(self.technician_id.clone());
    self.session_active = true;
  }

  /// Pick up session ends reported by the monitor.
  fn collect_ends(&mut self) {
    while let Ok(end) = self.ends.try_recv() {
      self.session_ended(&end);
    }
  }

  fn session_ended(&mut self, end: &SessionEnd) {
    self.session_active = false;
    println!(
      "Session ended ({}) after {} min.",
      end.reason.as_str(),
      end.duration_ms / 60_000
    );
  }

  async fn handle_line(&mut self, line: &str) {
    // An end that landed since the last tick must not swallow this line
    self.collect_ends();
    if self.session_active {
      self.signals.on_interaction();
    }

    let command = match commands::parse(line) {
      Ok(command) => command,
      Err(message) => {
        println!("{}", message);
        return;
      }
    };
    // Input after a session ended starts a new one
    if !self.session_active && !matches!(command, ShellCommand::Quit | ShellCommand::Logout) {
      self.start_session();
    }

    match command {
      ShellCommand::More => {
        if !self.feed.load_more() {
          if self.feed.is_loading() {
            println!("Still loading...");
          } else {
            println!("No more jobs.");
          }
        }
      }
      ShellCommand::Refresh => self.feed.refresh(),
      ShellCommand::Done(id) => self.update_status(&id, "completed").await,
      ShellCommand::Status { id, status } => self.update_status(&id, &status).await,
      ShellCommand::Queue => {
        let cache = self.feed.service().cache();
        println!("{} pending write(s).", cache.queue_len());
      }
      ShellCommand::Hide => self.signals.on_hidden(),
      ShellCommand::Show => self.signals.on_visible(),
      ShellCommand::Logout => {
        info!("logout requested");
        self.signals.on_logout();
      }
      ShellCommand::Help => {
        for line in commands::help_lines() {
          println!("{}", line);
        }
      }
      ShellCommand::Quit => self.should_quit = true,
      ShellCommand::Empty => {}
    }
  }

  async fn update_status(&mut self, id: &str, status: &str) {
    if !self.feed.jobs().iter().any(|j| j.id == id) {
      println!("No job {} in the list.", id);
      return;
    }
    let outcome = self.feed.update_status(id, status, Map::new()).await;
    print_outcome(id, status, &outcome);
  }

  fn render(&self) {
    if let QueryState::Error(e) = self.feed.state() {
      println!("Load failed: {}", e);
      return;
    }
    if let Some(source) = self.feed.source() {
      print_source(source, self.feed.service().last_sync());
    }
    print_jobs(self.feed.jobs());
    if self.feed.has_more() {
      println!("Type 'more' for the next page.");
    }
  }
}

/// Open the configured store. A broken cache must not stop the client, so
/// failures fall back to an in-memory store.
fn open_store(config: &CacheConfig) -> DurableStore {
  if !config.enabled {
    return DurableStore::new(NoopBackend);
  }
  let opened = match &config.path {
    Some(path) => SqliteBackend::open_at(path),
    None => SqliteBackend::open(),
  };
  match opened {
    Ok(backend) => DurableStore::new(backend),
    Err(e) => {
      warn!(error = %e, "cache unavailable, using memory only");
      DurableStore::in_memory()
    }
  }
}

fn print_source(source: DataSource, last_sync: Option<i64>) {
  let hint = match source {
    DataSource::Network | DataSource::Cache => return,
    DataSource::StaleCache => "offline: showing cached data",
    DataSource::OfflineFallback => "offline: showing sample data",
  };
  match last_sync {
    Some(ms) => println!("[{}, last sync {}]", hint, format_ms(ms)),
    None => println!("[{}]", hint),
  }
}

fn print_jobs(jobs: &[JobSummary]) {
  if jobs.is_empty() {
    println!("No jobs.");
    return;
  }
  for job in jobs {
    println!(
      "{:<12} {:<12} {:<8} {:<10} {}",
      job.id,
      job.status,
      job.priority.as_deref().unwrap_or("-"),
      job.date.as_deref().unwrap_or("-"),
      job.title
    );
  }
}

fn print_outcome(id: &str, status: &str, outcome: &WriteOutcome) {
  match outcome {
    WriteOutcome::Confirmed => println!("{} -> {}", id, status),
    WriteOutcome::Unconfirmed { reason, .. } => {
      println!("{} -> {} (saved offline, will sync: {})", id, status, reason)
    }
  }
}

fn format_ms(epoch_ms: i64) -> String {
  DateTime::from_timestamp_millis(epoch_ms)
    .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
    .unwrap_or_else(|| "?".to_string())
}
