//! Session liveness: detects the end of an active work session and
//! reconciles it with the Session API exactly once.

pub mod client;
pub mod monitor;
pub mod signals;

pub use client::SessionClient;
pub use monitor::{
  EndReason, LivenessMachine, LivenessState, MonitorSettings, SessionEnd, SessionMonitor,
  ACTIVE_SESSION_KEY,
};
pub use signals::SignalSender;
