//! Session liveness monitor.
//!
//! [`LivenessMachine`] is the pure state machine: it is driven by explicit
//! timestamps and yields a [`SessionEnd`] on the Active -> Inactive edge,
//! exactly once per session. [`SessionMonitor`] wraps it in a task that owns
//! the timers, listens to a [`SignalSender`], and performs the end-of-session
//! reconciliation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::DurableStore;
use crate::clock::SharedClock;

use super::client::SessionClient;
use super::signals::{Command, SignalSender};

/// Store key holding the persisted active-session flag
pub const ACTIVE_SESSION_KEY: &str = "active_session";

pub const DEFAULT_INACTIVITY_THRESHOLD: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_UNLOAD_BUDGET: Duration = Duration::from_secs(2);
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
  /// The user logged out
  Logout,
  /// The host shut down
  Terminated,
  /// No interaction for longer than the threshold
  Inactivity,
  /// Hidden for longer than the threshold
  Hidden,
  /// Left active by a previous run that never reconciled
  Orphaned,
}

impl EndReason {
  pub fn as_str(self) -> &'static str {
    match self {
      EndReason::Logout => "logout",
      EndReason::Terminated => "terminated",
      EndReason::Inactivity => "inactivity",
      EndReason::Hidden => "hidden",
      EndReason::Orphaned => "orphaned",
    }
  }

  /// Whether the session ended without the user asking for it.
  pub fn is_automatic(self) -> bool {
    !matches!(self, EndReason::Logout)
  }
}

/// Facts about a session that just ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnd {
  pub technician_id: String,
  pub session_id: String,
  pub started_at_ms: i64,
  pub ended_at_ms: i64,
  pub duration_ms: i64,
  pub reason: EndReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessState {
  Inactive,
  Active {
    technician_id: String,
    session_id: String,
    started_at_ms: i64,
    last_activity_ms: i64,
  },
}

/// Liveness state machine.
#[derive(Debug)]
pub struct LivenessMachine {
  state: LivenessState,
  threshold_ms: i64,
  hidden_since: Option<i64>,
}

impl LivenessMachine {
  pub fn new(inactivity_threshold: Duration) -> Self {
    Self {
      state: LivenessState::Inactive,
      threshold_ms: inactivity_threshold.as_millis() as i64,
      hidden_since: None,
    }
  }

  pub fn state(&self) -> &LivenessState {
    &self.state
  }

  pub fn is_active(&self) -> bool {
    matches!(self.state, LivenessState::Active { .. })
  }

  /// Enter a new active session. Ignored while one is already active.
  pub fn start(&mut self, technician_id: &str, session_id: &str, now_ms: i64) -> bool {
    if self.is_active() {
      return false;
    }
    self.state = LivenessState::Active {
      technician_id: technician_id.to_string(),
      session_id: session_id.to_string(),
      started_at_ms: now_ms,
      last_activity_ms: now_ms,
    };
    self.hidden_since = None;
    true
  }

  pub fn record_interaction(&mut self, now_ms: i64) {
    if let LivenessState::Active {
      last_activity_ms, ..
    } = &mut self.state
    {
      *last_activity_ms = (*last_activity_ms).max(now_ms);
    }
  }

  pub fn hidden(&mut self, now_ms: i64) {
    if self.is_active() && self.hidden_since.is_none() {
      self.hidden_since = Some(now_ms);
    }
  }

  pub fn visible(&mut self) {
    self.hidden_since = None;
  }

  /// When a hidden session is due for its recheck.
  pub fn hidden_deadline(&self) -> Option<i64> {
    if !self.is_active() {
      return None;
    }
    self.hidden_since.map(|since| since + self.threshold_ms)
  }

  /// Periodic check: ends the session after too long without interaction.
  pub fn check_inactivity(&mut self, now_ms: i64) -> Option<SessionEnd> {
    match &self.state {
      LivenessState::Active {
        last_activity_ms, ..
      } if now_ms - last_activity_ms > self.threshold_ms => {
        self.end(EndReason::Inactivity, now_ms)
      }
      _ => None,
    }
  }

  /// Hidden recheck: ends the session if it is still hidden past the threshold.
  pub fn recheck_hidden(&mut self, now_ms: i64) -> Option<SessionEnd> {
    match self.hidden_deadline() {
      Some(deadline) if now_ms >= deadline => self.end(EndReason::Hidden, now_ms),
      _ => None,
    }
  }

  /// End the active session, if any, for an explicit reason.
  pub fn end(&mut self, reason: EndReason, now_ms: i64) -> Option<SessionEnd> {
    let previous = std::mem::replace(&mut self.state, LivenessState::Inactive);
    self.hidden_since = None;
    match previous {
      LivenessState::Active {
        technician_id,
        session_id,
        started_at_ms,
        ..
      } => Some(SessionEnd {
        technician_id,
        session_id,
        started_at_ms,
        ended_at_ms: now_ms,
        duration_ms: (now_ms - started_at_ms).max(0),
        reason,
      }),
      LivenessState::Inactive => None,
    }
  }
}

/// Persisted flag marking an active session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveSessionFlag {
  technician_id: String,
  session_id: String,
  started_at_ms: i64,
  last_activity_ms: i64,
}

/// Timer settings for the monitor task.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
  pub inactivity_threshold: Duration,
  pub check_interval: Duration,
  pub heartbeat_interval: Duration,
  pub unload_budget: Duration,
}

impl Default for MonitorSettings {
  fn default() -> Self {
    Self {
      inactivity_threshold: DEFAULT_INACTIVITY_THRESHOLD,
      check_interval: DEFAULT_CHECK_INTERVAL,
      heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
      unload_budget: DEFAULT_UNLOAD_BUDGET,
    }
  }
}

/// Task wrapper around [`LivenessMachine`].
pub struct SessionMonitor {
  machine: LivenessMachine,
  client: SessionClient,
  store: DurableStore,
  clock: SharedClock,
  settings: MonitorSettings,
  ends: Option<mpsc::UnboundedSender<SessionEnd>>,
}

impl SessionMonitor {
  pub fn new(
    client: SessionClient,
    store: DurableStore,
    clock: SharedClock,
    settings: MonitorSettings,
  ) -> Self {
    Self {
      machine: LivenessMachine::new(settings.inactivity_threshold),
      client,
      store,
      clock,
      settings,
      ends: None,
    }
  }

  /// Receive every session end after its reconciliation ran.
  pub fn with_end_listener(mut self, tx: mpsc::UnboundedSender<SessionEnd>) -> Self {
    self.ends = Some(tx);
    self
  }

  /// Spawn the monitor task.
  ///
  /// The task runs until every `SignalSender` is dropped.
  pub fn spawn(self) -> (SignalSender, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let signals = SignalSender::new(tx, self.settings.unload_budget);
    let handle = tokio::spawn(self.run(rx));
    (signals, handle)
  }

  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
    self.recover_orphaned().await;

    // Zero periods would panic the timers
    let check_every = self.settings.check_interval.max(MIN_PERIOD);
    let heartbeat_every = self.settings.heartbeat_interval.max(MIN_PERIOD);

    let start = Instant::now();
    let mut check = interval_at(start + check_every, check_every);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat = interval_at(start + heartbeat_every, heartbeat_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
      threshold = ?self.settings.inactivity_threshold,
      "session monitor started"
    );

    loop {
      let hidden_wait = self
        .machine
        .hidden_deadline()
        .map(|at| Duration::from_millis((at - self.clock.now_ms()).max(0) as u64));
      let hidden_recheck = async move {
        match hidden_wait {
          Some(wait) => tokio::time::sleep(wait).await,
          None => std::future::pending::<()>().await,
        }
      };

      tokio::select! {
        command = rx.recv() => match command {
          Some(command) => self.handle(command).await,
          None => break,
        },
        _ = check.tick() => {
          let now = self.clock.now_ms();
          if let Some(end) = self.machine.check_inactivity(now) {
            self.reconcile(end).await;
          }
        }
        _ = heartbeat.tick() => self.send_heartbeat(),
        _ = hidden_recheck => {
          let now = self.clock.now_ms();
          if let Some(end) = self.machine.recheck_hidden(now) {
            self.reconcile(end).await;
          }
        }
      }
    }

    debug!("session monitor stopped");
  }

  async fn handle(&mut self, command: Command) {
    let now = self.clock.now_ms();
    match command {
      Command::Start { technician_id } => self.start(&technician_id, now),
      Command::Interaction => self.machine.record_interaction(now),
      Command::Hidden => self.machine.hidden(now),
      Command::Visible => self.machine.visible(),
      Command::Logout => {
        if let Some(end) = self.machine.end(EndReason::Logout, now) {
          self.reconcile(end).await;
        }
      }
      Command::Terminating { done } => {
        if let Some(end) = self.machine.end(EndReason::Terminated, now) {
          self.reconcile(end).await;
        }
        let _ = done.send(());
      }
    }
  }

  fn start(&mut self, technician_id: &str, now: i64) {
    let session_id = format!("session-{}-{}", technician_id, now);
    if !self.machine.start(technician_id, &session_id, now) {
      warn!(technician_id, "session already active, start ignored");
      return;
    }

    self.persist_flag();
    info!(technician_id, session_id = %session_id, "session started");

    let client = self.client.clone();
    let technician_id = technician_id.to_string();
    tokio::spawn(async move {
      if let Err(e) = client.start(&technician_id, &session_id, now).await {
        warn!(error = %e, "session start notification failed");
      }
    });
  }

  /// Heartbeats are advisory: a failed one is logged and nothing else.
  fn send_heartbeat(&mut self) {
    let LivenessState::Active {
      technician_id,
      last_activity_ms,
      ..
    } = self.machine.state().clone()
    else {
      return;
    };
    self.persist_flag();

    let now = self.clock.now_ms();
    let is_active =
      now - last_activity_ms <= self.settings.inactivity_threshold.as_millis() as i64;
    let client = self.client.clone();
    tokio::spawn(async move {
      if let Err(e) = client
        .heartbeat(&technician_id, now, is_active, last_activity_ms)
        .await
      {
        warn!(error = %e, "heartbeat failed");
      }
    });
  }

  /// End-of-session side effects.
  ///
  /// The flag is cleared first so that a cut-short reconciliation can never
  /// be replayed as an orphan. Remote notifications are each time-bounded and
  /// their failures are only logged.
  async fn reconcile(&mut self, end: SessionEnd) {
    self.store.remove(ACTIVE_SESSION_KEY);
    info!(
      technician_id = %end.technician_id,
      session_id = %end.session_id,
      reason = end.reason.as_str(),
      duration_ms = end.duration_ms,
      "session ended"
    );

    if let Err(e) = self.client.clock_out(&end).await {
      warn!(error = %e, "clock-out record failed");
    }
    if let Err(e) = self.client.logout_event(&end).await {
      warn!(error = %e, "logout event failed");
    }
    if end.reason.is_automatic() {
      if let Err(e) = self.client.notify_session_end(&end).await {
        warn!(error = %e, "session end notification failed");
      }
    }

    if let Some(tx) = &self.ends {
      let _ = tx.send(end);
    }
  }

  /// Reconcile a session a previous run left flagged as active.
  async fn recover_orphaned(&mut self) {
    let Some(raw) = self.store.get(ACTIVE_SESSION_KEY) else {
      return;
    };
    match serde_json::from_str::<ActiveSessionFlag>(&raw) {
      Ok(flag) => {
        let end = SessionEnd {
          duration_ms: (flag.last_activity_ms - flag.started_at_ms).max(0),
          technician_id: flag.technician_id,
          session_id: flag.session_id,
          started_at_ms: flag.started_at_ms,
          ended_at_ms: flag.last_activity_ms,
          reason: EndReason::Orphaned,
        };
        self.reconcile(end).await;
      }
      Err(e) => {
        warn!(error = %e, "unreadable session flag, dropping it");
        self.store.remove(ACTIVE_SESSION_KEY);
      }
    }
  }

  fn persist_flag(&self) {
    let LivenessState::Active {
      technician_id,
      session_id,
      started_at_ms,
      last_activity_ms,
    } = self.machine.state()
    else {
      return;
    };
    let flag = ActiveSessionFlag {
      technician_id: technician_id.clone(),
      session_id: session_id.clone(),
      started_at_ms: *started_at_ms,
      last_activity_ms: *last_activity_ms,
    };
    if let Ok(raw) = serde_json::to_string(&flag) {
      self.store.set(ACTIVE_SESSION_KEY, &raw);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::SystemClock;
  use crate::test_support::FakeApi;
  use std::sync::Arc;

  const MIN: i64 = 60_000;

  fn machine() -> LivenessMachine {
    LivenessMachine::new(Duration::from_secs(30 * 60))
  }

  #[test]
  fn test_single_fire_per_inactivity_episode() {
    let mut m = machine();
    let mut fired = 0;

    m.start("T1", "s1", 0);
    for t in (0..=45).map(|i| i * MIN) {
      if m.check_inactivity(t).is_some() {
        fired += 1;
      }
    }
    assert_eq!(fired, 1);
    assert!(!m.is_active());

    // Renewed activity: a new session with interactions
    m.start("T1", "s2", 50 * MIN);
    m.record_interaction(70 * MIN);
    assert!(m.check_inactivity(90 * MIN).is_none());
    for t in (91..=140).map(|i| i * MIN) {
      if let Some(end) = m.check_inactivity(t) {
        fired += 1;
        assert_eq!(end.session_id, "s2");
        assert_eq!(end.reason, EndReason::Inactivity);
      }
    }
    assert_eq!(fired, 2);
  }

  #[test]
  fn test_threshold_is_exclusive() {
    let mut m = machine();
    m.start("T1", "s1", 0);
    assert!(m.check_inactivity(30 * MIN).is_none());
    let end = m.check_inactivity(30 * MIN + 1).unwrap();
    assert_eq!(end.duration_ms, 30 * MIN + 1);
  }

  #[test]
  fn test_hidden_recheck_requires_still_hidden() {
    let mut m = machine();
    m.start("T1", "s1", 0);

    m.hidden(MIN);
    assert_eq!(m.hidden_deadline(), Some(31 * MIN));
    m.visible();
    m.record_interaction(2 * MIN);
    assert!(m.recheck_hidden(31 * MIN).is_none());
    assert!(m.is_active());

    m.hidden(10 * MIN);
    // Repeated hide does not move the deadline
    m.hidden(20 * MIN);
    assert!(m.recheck_hidden(39 * MIN).is_none());
    let end = m.recheck_hidden(40 * MIN).unwrap();
    assert_eq!(end.reason, EndReason::Hidden);
    assert_eq!(m.hidden_deadline(), None);
  }

  #[test]
  fn test_end_fires_once() {
    let mut m = machine();
    assert!(m.end(EndReason::Logout, 0).is_none());

    m.start("T1", "s1", 0);
    assert!(!m.start("T1", "s-dup", 1));
    assert!(m.end(EndReason::Terminated, 5).is_some());
    assert!(m.end(EndReason::Terminated, 6).is_none());
    assert!(m.check_inactivity(100 * MIN).is_none());
  }

  #[test]
  fn test_interaction_while_inactive_is_ignored() {
    let mut m = machine();
    m.record_interaction(10);
    m.hidden(10);
    assert_eq!(m.state(), &LivenessState::Inactive);
    assert_eq!(m.hidden_deadline(), None);
  }

  struct Running {
    api: FakeApi,
    store: DurableStore,
    signals: SignalSender,
    ends: mpsc::UnboundedReceiver<SessionEnd>,
    handle: JoinHandle<()>,
  }

  fn spawn_monitor(settings: MonitorSettings, store: DurableStore) -> Running {
    let api = FakeApi::new();
    let (tx, ends) = mpsc::unbounded_channel();
    let monitor = SessionMonitor::new(
      SessionClient::new(Arc::new(api.clone())),
      store.clone(),
      Arc::new(SystemClock),
      settings,
    )
    .with_end_listener(tx);
    let (signals, handle) = monitor.spawn();
    Running {
      api,
      store,
      signals,
      ends,
      handle,
    }
  }

  fn fast(threshold_ms: u64) -> MonitorSettings {
    MonitorSettings {
      inactivity_threshold: Duration::from_millis(threshold_ms),
      check_interval: Duration::from_millis(10),
      heartbeat_interval: Duration::from_secs(3600),
      unload_budget: Duration::from_secs(1),
    }
  }

  #[tokio::test]
  async fn test_inactivity_reconciles_once() {
    let mut r = spawn_monitor(fast(60), DurableStore::in_memory());
    r.signals.start_session("T1");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(r.store.get(ACTIVE_SESSION_KEY).is_some());

    tokio::time::sleep(Duration::from_millis(250)).await;

    let end = r.ends.try_recv().unwrap();
    assert_eq!(end.reason, EndReason::Inactivity);
    assert!(r.ends.try_recv().is_err());
    assert_eq!(r.store.get(ACTIVE_SESSION_KEY), None);
    assert_eq!(r.api.posts("/clock-records").len(), 1);
    assert_eq!(r.api.posts("/notifications/").len(), 1);
    assert_eq!(r.api.posts("/session/start").len(), 1);
    r.handle.abort();
  }

  #[tokio::test]
  async fn test_interaction_keeps_session_alive() {
    let mut r = spawn_monitor(fast(150), DurableStore::in_memory());
    r.signals.start_session("T1");
    for _ in 0..10 {
      tokio::time::sleep(Duration::from_millis(30)).await;
      r.signals.on_interaction();
    }
    assert!(r.ends.try_recv().is_err());

    r.signals.on_logout();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let end = r.ends.try_recv().unwrap();
    assert_eq!(end.reason, EndReason::Logout);
    // Explicit logouts do not notify the office
    assert!(r.api.posts("/notifications/").is_empty());
    assert_eq!(r.api.posts("/events/logout").len(), 1);
    r.handle.abort();
  }

  #[tokio::test]
  async fn test_terminating_waits_for_reconciliation() {
    let mut r = spawn_monitor(fast(60_000), DurableStore::in_memory());
    r.signals.start_session("T1");

    assert!(r.signals.on_terminating().await);
    assert_eq!(r.api.posts("/clock-records").len(), 1);
    assert_eq!(r.ends.try_recv().unwrap().reason, EndReason::Terminated);

    // Nothing left to end
    assert!(r.signals.on_terminating().await);
    assert!(r.ends.try_recv().is_err());
    r.handle.abort();
  }

  #[tokio::test]
  async fn test_hidden_too_long_ends_session() {
    let mut r = spawn_monitor(
      MonitorSettings {
        check_interval: Duration::from_secs(3600),
        ..fast(80)
      },
      DurableStore::in_memory(),
    );
    r.signals.start_session("T1");
    r.signals.on_hidden();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(r.ends.try_recv().unwrap().reason, EndReason::Hidden);
    r.handle.abort();
  }

  #[tokio::test]
  async fn test_failed_heartbeat_does_not_end_session() {
    let mut r = spawn_monitor(
      MonitorSettings {
        heartbeat_interval: Duration::from_millis(20),
        ..fast(60_000)
      },
      DurableStore::in_memory(),
    );
    r.api.respond_with("/session/heartbeat", 500);
    r.signals.start_session("T1");
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert!(r.api.count(crate::net::Method::Post, "/session/heartbeat") >= 2);
    assert!(r.ends.try_recv().is_err());
    assert!(r.store.get(ACTIVE_SESSION_KEY).is_some());
    r.handle.abort();
  }

  #[tokio::test]
  async fn test_zero_periods_do_not_kill_the_monitor() {
    let mut r = spawn_monitor(
      MonitorSettings {
        check_interval: Duration::ZERO,
        heartbeat_interval: Duration::ZERO,
        ..fast(60_000)
      },
      DurableStore::in_memory(),
    );
    r.signals.start_session("T1");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!r.handle.is_finished());

    r.signals.on_logout();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(r.ends.try_recv().unwrap().reason, EndReason::Logout);
    r.handle.abort();
  }

  #[tokio::test]
  async fn test_orphaned_session_is_reconciled_on_start() {
    let store = DurableStore::in_memory();
    store.set(
      ACTIVE_SESSION_KEY,
      r#"{"technicianId":"T1","sessionId":"old","startedAtMs":0,"lastActivityMs":120000}"#,
    );

    let mut r = spawn_monitor(fast(60_000), store);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let end = r.ends.try_recv().unwrap();
    assert_eq!(end.reason, EndReason::Orphaned);
    assert_eq!(end.session_id, "old");
    assert_eq!(end.duration_ms, 120_000);
    assert_eq!(r.store.get(ACTIVE_SESSION_KEY), None);
    r.handle.abort();
  }
}
