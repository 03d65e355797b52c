// Logging module - tracing subscriber setup
//
// Console output is always on, in the configured format. When file logging
// is enabled, a second layer writes JSON lines to a rolling file through a
// non-blocking writer.
//
// Filter precedence: RUST_LOG env var > config file > default "info"

use crate::config::{ConsoleFormat, LogRotation, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when RUST_LOG is not set
fn default_filter(level: &str) -> String {
    format!("llm_gateway={},axum=info", level)
}

fn file_appender(config: &LoggingConfig) -> tracing_appender::rolling::RollingFileAppender {
    match config.file_rotation {
        LogRotation::Hourly => {
            tracing_appender::rolling::hourly(&config.file_dir, &config.file_prefix)
        }
        LogRotation::Daily => tracing_appender::rolling::daily(&config.file_dir, &config.file_prefix),
        LogRotation::Never => tracing_appender::rolling::never(&config.file_dir, &config.file_prefix),
    }
}

/// Install the global subscriber.
///
/// The returned guard must be kept alive for the duration of the program so
/// buffered file logs are flushed on exit.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&config.level).into());

    let mut guard = None;
    let file_layer = if config.file_enabled {
        match std::fs::create_dir_all(&config.file_dir) {
            Ok(()) => {
                // Wrap in non-blocking writer (writes happen in background thread)
                let (non_blocking, file_guard) =
                    tracing_appender::non_blocking(file_appender(config));
                guard = Some(file_guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
            }
            Err(e) => {
                // Subscriber is not up yet
                eprintln!(
                    "Warning: Could not create log directory {:?}: {}",
                    config.file_dir, e
                );
                None
            }
        }
    } else {
        None
    };

    // At most one of these is Some
    let format = config.console_format;
    let full = (format == ConsoleFormat::Full).then(|| tracing_subscriber::fmt::layer());
    let compact =
        (format == ConsoleFormat::Compact).then(|| tracing_subscriber::fmt::layer().compact());
    let json = (format == ConsoleFormat::Json).then(|| tracing_subscriber::fmt::layer().json());

    tracing_subscriber::registry()
        .with(filter)
        .with(full)
        .with(compact)
        .with(json)
        .with(file_layer)
        .init();

    guard
}
