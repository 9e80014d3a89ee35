use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// RUST_LOG takes precedence over the configured filter. Logs go to stderr,
/// keeping stdout free for `--once` output, or to `logging.file` through a
/// non-blocking writer. Keep the returned guard alive until exit so buffered
/// lines are flushed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = match EnvFilter::try_from_default_env() {
    Ok(filter) => filter,
    Err(_) => EnvFilter::try_new(&config.filter)
      .map_err(|e| eyre!("Invalid log filter '{}': {}", config.filter, e))?,
  };

  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(false);

  let Some(path) = &config.file else {
    let _ = builder.with_writer(std::io::stderr).try_init();
    return Ok(None);
  };

  let directory = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or_else(|| std::path::Path::new("."));
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Log file path {} has no file name", path.display()))?;
  std::fs::create_dir_all(directory)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;

  let appender = tracing_appender::rolling::never(directory, file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let _ = builder.with_ansi(false).with_writer(writer).try_init();
  Ok(Some(guard))
}
