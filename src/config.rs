use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::MonitorSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL shared by the Jobs and Session APIs
  pub base_url: String,
  /// Technician whose jobs and session this client tracks
  pub technician_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// When disabled every read goes to the network and nothing is queued durably
  pub enabled: bool,
  pub ttl_secs: u64,
  /// SQLite file (defaults to the user data directory)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_secs: 300,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub request_timeout_ms: u64,
  pub drain_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      request_timeout_ms: 8_000,
      drain_interval_secs: 300,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  pub inactivity_threshold_secs: u64,
  pub check_interval_secs: u64,
  pub heartbeat_interval_secs: u64,
  pub request_timeout_ms: u64,
  /// How long shutdown waits for session reconciliation
  pub unload_budget_ms: u64,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      inactivity_threshold_secs: 30 * 60,
      check_interval_secs: 60,
      heartbeat_interval_secs: 300,
      request_timeout_ms: 5_000,
      unload_budget_ms: 2_000,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }
}

impl SyncConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }

  pub fn drain_interval(&self) -> Duration {
    Duration::from_secs(self.drain_interval_secs)
  }
}

impl SessionConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }

  pub fn monitor_settings(&self) -> MonitorSettings {
    MonitorSettings {
      inactivity_threshold: Duration::from_secs(self.inactivity_threshold_secs),
      check_interval: Duration::from_secs(self.check_interval_secs),
      heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
      unload_budget: Duration::from_millis(self.unload_budget_ms),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/fieldsync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("fieldsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  /// Reject zero durations. A zero period would panic the timers that use it
  /// or spin the drain loop.
  fn validate(&self) -> Result<()> {
    let durations = [
      ("cache.ttl_secs", self.cache.ttl_secs),
      ("sync.request_timeout_ms", self.sync.request_timeout_ms),
      ("sync.drain_interval_secs", self.sync.drain_interval_secs),
      (
        "session.inactivity_threshold_secs",
        self.session.inactivity_threshold_secs,
      ),
      ("session.check_interval_secs", self.session.check_interval_secs),
      (
        "session.heartbeat_interval_secs",
        self.session.heartbeat_interval_secs,
      ),
      ("session.request_timeout_ms", self.session.request_timeout_ms),
      ("session.unload_budget_ms", self.session.unload_budget_ms),
    ];
    match durations.iter().find(|(_, value)| *value == 0) {
      Some((name, _)) => Err(eyre!("{} must be greater than zero", name)),
      None => Ok(()),
    }
  }

  /// Technician id, or an error telling the user how to set one.
  pub fn technician_id(&self) -> Result<&str> {
    self
      .api
      .technician_id
      .as_deref()
      .ok_or_else(|| eyre!("No technician id. Set api.technician_id or pass --technician."))
  }
}
