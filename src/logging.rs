//! Tracing setup.

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::{self, LoggingConfig};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. The returned guard must be
/// held for the life of the process when file logging is enabled, or
/// buffered lines are lost.
pub fn init(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false);

  if logging.file {
    let dir = config::data_dir()?.join("logs");
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

    let appender = tracing_appender::rolling::daily(&dir, "reliefsync.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
      .with_writer(writer)
      .with_ansi(false);

    tracing_subscriber::registry()
      .with(filter)
      .with(stderr_layer)
      .with(file_layer)
      .try_init()
      .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

    Ok(Some(guard))
  } else {
    tracing_subscriber::registry()
      .with(filter)
      .with(stderr_layer)
      .try_init()
      .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

    Ok(None)
  }
}
