mod app;
mod config;
mod event;
mod session;
mod store;
mod sync;
mod ui;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use config::Config;
use session::Session;
use store::{HttpTaskStore, MemoryTaskStore, TaskStore};
use sync::SyncEngine;

#[derive(Parser, Debug)]
#[command(name = "t9s")]
#[command(about = "A terminal UI for task tracking, inspired by k9s")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/t9s/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Owner id to create tasks under
  #[arg(short, long)]
  owner: Option<i64>,

  /// Use the built-in in-memory store instead of the remote service
  #[arg(long)]
  offline: bool,

  /// Drop the persisted session and exit
  #[arg(long)]
  logout: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  if args.logout {
    Session::clear()?;
    println!("Session cleared.");
    return Ok(());
  }

  let _log_guard = init_tracing()?;

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if args.offline {
    config.offline = true;
  }

  let (store, owner_id) = build_store(&config).await?;
  let owner_id = args.owner.unwrap_or(owner_id);

  // Initialize and run the app
  let engine = SyncEngine::new(store, owner_id);
  let mut app = app::App::new(config, engine);
  app.run().await?;

  Ok(())
}

/// Pick the store backend and resolve the session.
///
/// The task view is only reachable with a token present (or offline); this
/// is the whole of the auth guard.
async fn build_store(config: &Config) -> Result<(Arc<dyn TaskStore>, i64)> {
  if config.offline {
    return Ok((Arc::new(MemoryTaskStore::new()), config.default_owner));
  }

  let timeout = Duration::from_secs(config.service.timeout_secs);

  // Token from the environment wins; then a persisted session; then a
  // credential login when a username is configured.
  if let Some(token) = Config::get_api_token() {
    let store = HttpTaskStore::new(&config.service.url, timeout, Some(token))?;
    return Ok((Arc::new(store), config.default_owner));
  }

  if let Some(session) = Session::load()? {
    let store = HttpTaskStore::new(&config.service.url, timeout, Some(session.access_token))?;
    return Ok((Arc::new(store), session.id));
  }

  if let Some(username) = &config.service.username {
    let password = Config::get_password()?;
    let anonymous = HttpTaskStore::new(&config.service.url, timeout, None)?;
    let session = anonymous.login(username, &password).await?;
    session.save()?;
    tracing::info!(username = %session.username, "logged in");
    let store = HttpTaskStore::new(
      &config.service.url,
      timeout,
      Some(session.access_token.clone()),
    )?;
    return Ok((Arc::new(store), session.id));
  }

  Err(eyre!(
    "Not authenticated. Set T9S_TOKEN, configure service.username (with T9S_PASSWORD set), \
     or run with --offline."
  ))
}

/// Log to a rolling file under the data dir; the terminal belongs to the UI.
fn init_tracing() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("t9s")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "t9s.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
