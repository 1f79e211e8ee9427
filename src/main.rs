mod cache;
mod commands;
mod config;
mod host;
mod logging;
mod net;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::cache::SqliteStorage;

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Offline-support worker: versioned response cache with network-first fallback")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin to register the worker for, overriding the config file
  #[arg(short, long)]
  origin: Option<Url>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured cache version and delete stale stores
  Install,
  /// Request paths or URLs through the worker
  Fetch {
    /// Paths (resolved against the origin) or absolute URLs
    #[arg(required = true)]
    targets: Vec<String>,

    /// HTTP method
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Request body, for non-GET requests
    #[arg(short, long)]
    data: Option<String>,

    /// Simulate a network outage
    #[arg(long)]
    offline: bool,

    /// Print response bodies as text
    #[arg(long)]
    body: bool,
  },
  /// List cache stores and their entry counts
  Stores,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = match args.origin {
    Some(origin) => config.with_origin(origin)?,
    None => config,
  };

  let _log_guard = logging::init(&config::data_dir()?)?;

  let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);

  match args.command {
    Command::Install => commands::install(&config, storage).await,
    Command::Fetch {
      targets,
      method,
      data,
      offline,
      body,
    } => {
      let options = commands::FetchOptions {
        method,
        data,
        offline,
        show_body: body,
      };
      commands::fetch(&config, storage, &targets, &options).await
    }
    Command::Stores => commands::stores(&config, storage).await,
  }
}
