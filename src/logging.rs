//! Subscriber setup for binaries. The library itself only emits events.

use crate::config::LoggingConfig;
use crate::{PostforgeError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt::layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Console output on stderr plus an append-only log file.
///
/// Filter precedence: `POSTFORGE_LOG`, then `RUST_LOG`, then `config.level`.
/// Keep the returned guard alive until exit so buffered lines reach the file.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.dir).map_err(|e| PostforgeError::io(&config.dir, e))?;

    let filter = || {
        EnvFilter::try_from_env("POSTFORGE_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let file_appender = tracing_appender::rolling::never(&config.dir, &config.file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let console = layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter());
    let file = layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter());

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| PostforgeError::Config(format!("logging already initialized: {e}")))?;

    Ok(guard)
}
