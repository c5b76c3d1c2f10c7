use std::fs;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::TopologyError;

// Keeps the file writer flushing for the life of the process
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global tracing subscriber.
///
/// Console output honours `RUST_LOG`, falling back to the configured level.
/// When a directory is configured, JSON lines are also written to a daily
/// rolling `topology.*.log` file there. Calling this twice is an error rather
/// than a panic so embedding applications can own the subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), TopologyError> {
    let console = config.console.then(|| {
        fmt::Layer::new()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_filter(filter(&config.level))
    });

    let file = match &config.directory {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::RollingFileAppender::builder()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix("topology")
                .filename_suffix("log")
                .build(dir)
                .map_err(|e| TopologyError::Logging(e.to_string()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                fmt::Layer::new()
                    .json()
                    .with_writer(writer)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_ansi(false)
                    .with_filter(filter(&config.level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| TopologyError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            directory: Some(dir.path().to_path_buf()),
            console: false,
        };
        // Another test may already own the global subscriber
        let _ = init(&config);
        assert!(matches!(init(&config), Err(TopologyError::Logging(_))));
    }
}
