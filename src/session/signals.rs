//! Environment signal source feeding the session monitor.
//!
//! Whatever hosts the client (a terminal loop, a desktop shell, a test)
//! reports user activity, visibility changes and shutdown through a
//! [`SignalSender`] instead of the monitor listening for them itself.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Messages understood by the monitor task.
#[derive(Debug)]
pub(crate) enum Command {
  Start { technician_id: String },
  Interaction,
  Hidden,
  Visible,
  Logout,
  Terminating { done: oneshot::Sender<()> },
}

/// Handle used by the host environment to signal the session monitor.
#[derive(Clone)]
pub struct SignalSender {
  tx: mpsc::UnboundedSender<Command>,
  unload_budget: Duration,
}

impl SignalSender {
  pub(crate) fn new(tx: mpsc::UnboundedSender<Command>, unload_budget: Duration) -> Self {
    Self { tx, unload_budget }
  }

  fn send(&self, command: Command) {
    if self.tx.send(command).is_err() {
      warn!("session monitor is not running, signal dropped");
    }
  }

  /// Begin an active session for `technician_id`.
  pub fn start_session(&self, technician_id: impl Into<String>) {
    self.send(Command::Start {
      technician_id: technician_id.into(),
    });
  }

  /// Any user input.
  pub fn on_interaction(&self) {
    self.send(Command::Interaction);
  }

  pub fn on_hidden(&self) {
    self.send(Command::Hidden);
  }

  pub fn on_visible(&self) {
    self.send(Command::Visible);
  }

  /// Explicit logout by the user.
  pub fn on_logout(&self) {
    self.send(Command::Logout);
  }

  /// The host is about to exit.
  ///
  /// Waits for session reconciliation, but no longer than the unload budget.
  /// Returns `true` if reconciliation finished in time.
  pub async fn on_terminating(&self) -> bool {
    let (done, wait) = oneshot::channel();
    if self.tx.send(Command::Terminating { done }).is_err() {
      return false;
    }
    matches!(
      tokio::time::timeout(self.unload_budget, wait).await,
      Ok(Ok(()))
    )
  }
}
