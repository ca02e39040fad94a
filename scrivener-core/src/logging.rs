//! Tracing setup: human-readable stderr plus optional JSON file logging.

use crate::config::LoggingConfig;
use crate::error::ConfigError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter for the stderr layer: `RUST_LOG` when set, else the configured level.
pub fn stderr_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber.
///
/// The returned guard flushes the JSON file writer on drop and must be kept
/// alive for as long as logs should be written. Returns `None` when the file
/// layer is disabled. A subscriber installed earlier is left in place.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ConfigError> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter(config));

    let (json_layer, guard) = match &config.json_dir {
        Some(dir) => {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&config.file_prefix)
                .build(dir)
                .map_err(|e| ConfigError::Invalid {
                    field: "logging.json_dir".into(),
                    reason: format!("cannot write logs to {}: {e}", dir.display()),
                })?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init();
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_without_file_layer() {
        let config = LoggingConfig {
            json_dir: None,
            ..Default::default()
        };
        assert!(init_logging(&config).unwrap().is_none());
    }

    #[test]
    fn test_init_with_file_layer_creates_dir() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let config = LoggingConfig {
            json_dir: Some(logs.clone()),
            ..Default::default()
        };
        let guard = init_logging(&config).unwrap();
        assert!(guard.is_some());
        assert!(logs.is_dir());
    }

    #[test]
    fn test_init_reports_unusable_log_dir() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let config = LoggingConfig {
            json_dir: Some(blocker.join("logs")),
            ..Default::default()
        };
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "logging.json_dir"));
    }
}
