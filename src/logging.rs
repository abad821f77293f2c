//! Log sink setup. The console owns stdout, so logs go to a file.

use std::path::{Path, PathBuf};

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE: &str = "termtube.log";

/// `<cache_dir>/termtube`, falling back to the temp directory.
pub fn default_log_dir() -> PathBuf {
  dirs::cache_dir()
    .unwrap_or_else(std::env::temp_dir)
    .join("termtube")
}

/// Install the global subscriber. `log` records from library code are
/// bridged into it. Keep the guard alive until exit so buffered lines flush.
pub fn init(dir: &Path, verbosity: Option<tracing::Level>) -> std::io::Result<WorkerGuard> {
  std::fs::create_dir_all(dir)?;

  let default_level = verbosity.map(LevelFilter::from_level).unwrap_or(LevelFilter::INFO);
  let filter = EnvFilter::builder()
    .with_default_directive(default_level.into())
    .from_env_lossy();

  let appender = tracing_appender::rolling::never(dir, LOG_FILE);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(std::io::Error::other)?;

  log::info!("Logging to {:?}", dir.join(LOG_FILE));
  Ok(guard)
}
