mod ci;
mod clock;
mod config;
mod error;
mod manager;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use ci::client::{Credentials, HttpClientFactory};
use ci::types::{BuildState, JobStatus};
use clock::SystemClock;
use config::Config;
use manager::ServerManager;

#[derive(Parser, Debug)]
#[command(name = "buildwatch")]
#[command(about = "A terminal dashboard for Jenkins-style build servers")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/buildwatch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Server view to poll, overriding the configured one
  #[arg(short, long)]
  view: Option<String>,

  /// Append logs to this file instead of stderr
  #[arg(long)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print every job with its current status
  Jobs,
  /// Print the aggregate dashboard snapshot
  Snapshot,
  /// Poll the server and print status changes as they happen
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(args.log_file.as_deref())?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override view if specified on command line
  if let Some(view) = args.view {
    config.server.view = Some(view);
  }

  let credentials = match &config.server.username {
    Some(username) => Some(Credentials {
      username: username.clone(),
      secret: Config::api_token()?,
    }),
    None => None,
  };

  let factory = Arc::new(HttpClientFactory::new(reqwest::Client::new()));
  let mut manager = ServerManager::new(factory, Arc::new(SystemClock));
  manager.initialize(config.server.clone(), credentials.clone())?;

  if credentials.is_some() {
    manager.login().await?;
  }

  match args.command.unwrap_or(Command::Snapshot) {
    Command::Jobs => print_jobs(&mut manager).await,
    Command::Snapshot => print_snapshot(&mut manager, &config).await,
    Command::Watch => watch(&mut manager, &config).await,
  }
}

/// Set up tracing output; returns a guard that must outlive main when
/// logging to a file.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let filter = EnvFilter::from_default_env().add_directive("buildwatch=info".parse()?);

  match log_file {
    Some(path) => {
      let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
      let (writer, guard) = tracing_appender::non_blocking(file);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt().with_env_filter(filter).init();
      Ok(None)
    }
  }
}

async fn print_jobs(manager: &mut ServerManager) -> Result<()> {
  let jobs = manager.project_list().await?;

  for job in &jobs {
    println!("{:<40} {}", job.name, job.status);
  }
  Ok(())
}

async fn print_snapshot(manager: &mut ServerManager, config: &Config) -> Result<()> {
  let snapshot = manager.server_snapshot().await?;

  let title = config
    .title
    .clone()
    .unwrap_or_else(|| config.server.url.clone());
  println!("{} - {} projects", title, snapshot.projects.len());

  for project in &snapshot.projects {
    let building = if project.building { " (building)" } else { "" };
    println!("  {:<38} {}{}", project.name, project.state, building);
  }

  let summary: Vec<String> = BuildState::ALL
    .iter()
    .map(|state| (state, snapshot.count(*state)))
    .filter(|(_, count)| *count > 0)
    .map(|(state, count)| format!("{} {}", count, state))
    .collect();
  println!("{}", summary.join(", "));

  Ok(())
}

/// The dashboard poll loop: refetch on an interval and report every job
/// whose status changed since the previous round.
async fn watch(manager: &mut ServerManager, config: &Config) -> Result<()> {
  let mut interval = tokio::time::interval(Duration::from_secs(config.poll_interval.max(1)));
  let mut previous: Option<HashMap<String, JobStatus>> = None;

  loop {
    interval.tick().await;

    let jobs = match manager.project_list().await {
      Ok(jobs) => jobs,
      Err(e) => {
        warn!("poll failed: {}", e);
        continue;
      }
    };

    match &previous {
      None => {
        for job in &jobs {
          println!("{:<40} {}", job.name, job.status);
        }
      }
      Some(seen) => {
        for job in &jobs {
          let changed = seen.get(&job.name) != Some(&job.status);
          if changed {
            println!("{:<40} {}", job.name, job.status);
          }
        }
      }
    }

    previous = Some(
      jobs
        .into_iter()
        .map(|job| (job.name, job.status))
        .collect(),
    );
  }
}
