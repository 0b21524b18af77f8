use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogConfig;

const DEFAULT_FILTER: &str = "warn,querykit=info";

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
///
/// Keep the returned guard alive until exit so buffered lines are flushed.
pub fn init(log: &LogConfig) -> Result<Option<WorkerGuard>> {
  let directive = log.filter.as_deref().unwrap_or(DEFAULT_FILTER);
  let env_filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(directive))
    .map_err(|e| eyre!("Invalid log filter {:?}: {}", directive, e))?;

  let (layer, guard) = match &log.dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "querykit.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .boxed();
      (layer, Some(guard))
    }
    None => {
      let layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true)
        .boxed();
      (layer, None)
    }
  };

  tracing_subscriber::registry()
    .with(env_filter)
    .with(layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
