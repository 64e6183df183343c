//! Tracing setup: stderr always, plus a daily log file for long-running mode.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

const LOG_LEVEL_ENV: &str = "QUITER_LOG";
const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "quiter-offline.log";

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Log to stderr, filtered by `QUITER_LOG` (default `info`).
pub fn init() {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter())
    .with_writer(std::io::stderr)
    .with_target(false)
    .try_init()
    .ok();
}

/// Log to stderr and to a daily rolling file in `dir`.
///
/// The returned guard flushes the file writer on drop; hold it until exit.
pub fn init_with_file(dir: &Path) -> WorkerGuard {
  let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
  let (file_writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter())
    .with_writer(std::io::stderr.and(file_writer))
    .with_target(false)
    .with_ansi(false)
    .try_init()
    .ok();

  guard
}
