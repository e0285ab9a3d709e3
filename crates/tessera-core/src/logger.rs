//! Process-wide tracing setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use tessera_types::models::LogConfig;
use tessera_types::ConfigError;

const LOG_FILE_PREFIX: &str = "tessera";

/// Parse filter directives, e.g. `info,tessera_core::registry=debug`.
pub fn parse_filter(field: &str, directives: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(directives).map_err(|e| ConfigError::ValidationError {
        field: field.to_string(),
        message: format!("'{}': {}", directives, e),
    })
}

/// `RUST_LOG` when set, otherwise the configured level.
fn build_filter(config: &LogConfig) -> Result<EnvFilter, ConfigError> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            parse_filter(EnvFilter::DEFAULT_ENV, &directives)
        },
        _ => parse_filter("log.level", &config.level),
    }
}

/// Install the global subscriber: stderr, plus daily-rotated files when `dir` is set.
///
/// Keep the returned guard alive for the life of the process or buffered file
/// output is lost.
pub fn init_logger(config: &LogConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let filter = build_filter(config)?;

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| ConfigError::from_io_error(std::path::Path::new(dir), &e))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix("log")
                .max_log_files(config.max_files)
                .build(dir)
                .map_err(|e| ConfigError::ValidationError {
                    field: "log.dir".to_string(),
                    message: e.to_string(),
                })?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        },
        None => (None, None),
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    // Fails only if a subscriber is already installed, which is harmless.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}
