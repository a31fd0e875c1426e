mod app;
mod commands;
mod event;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use fieldsync::{config, logging};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(about = "Offline-first job list and session tracking for field technicians")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Technician id to use instead of the configured one
  #[arg(short, long, global = true)]
  technician: Option<String>,

  /// Directory for log files (default: <data dir>/fieldsync/logs)
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List jobs, cache first
  Jobs {
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    limit: Option<u32>,
    /// Drop cached lists and read from the network
    #[arg(long)]
    refresh: bool,
  },
  /// Show one job
  Job { id: String },
  /// Change a job's status, queueing it if offline
  Status {
    id: String,
    status: String,
    #[arg(long)]
    note: Option<String>,
  },
  /// List writes waiting for the network
  Queue,
  /// Replay pending writes now
  Drain,
  /// Interactive session (default)
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let log_dir = match args.log_dir {
    Some(dir) => dir,
    None => logging::default_log_dir()?,
  };
  let _log_guard = logging::init(&log_dir)?;

  let mut config = config::Config::load(args.config.as_deref())?;

  // Override technician if specified on command line
  if let Some(technician) = args.technician {
    config.api.technician_id = Some(technician);
  }

  let app = app::App::new(config)?;
  match args.command.unwrap_or(Command::Run) {
    Command::Jobs {
      status,
      priority,
      limit,
      refresh,
    } => app.list_jobs(status, priority, limit, refresh).await?,
    Command::Job { id } => app.show_job(&id).await?,
    Command::Status { id, status, note } => app.set_status(&id, &status, note).await?,
    Command::Queue => app.show_queue(),
    Command::Drain => app.drain().await,
    Command::Run => app.run().await?,
  }

  Ok(())
}
