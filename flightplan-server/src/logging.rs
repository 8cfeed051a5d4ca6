use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flightplan_core::config::LoggingConfig;

/// Daily-rolling file log plus stderr. Keep the guard alive for the whole
/// process or buffered lines are lost on exit.
pub fn initialize_logging(config: &LoggingConfig) -> WorkerGuard {
    let dir = Path::new(&config.dir);
    let _ = std::fs::create_dir_all(dir);

    let file_appender = tracing_appender::rolling::daily(dir, &config.file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    tracing::debug!(dir = %dir.display(), file = %config.file, "logging initialized");
    guard
}
