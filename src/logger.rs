//! Process-wide logging setup
//!
//! Initialised once, before the pipeline is built. Events go to the console
//! and to `<directory>/<file_name>` (no ANSI colours in the file).

use crate::config::LoggingConfig;
use crate::error::{SragError, SragResult};
use std::fs::OpenOptions;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// Install the global tracing subscriber
///
/// Calling this more than once is a no-op. `RUST_LOG` overrides
/// `config.level`.
pub fn init(config: &LoggingConfig) -> SragResult<()> {
    if LOGGER_INIT.get().is_some() {
        return Ok(());
    }

    std::fs::create_dir_all(&config.directory)?;
    let log_path = config.directory.join(&config.file_name);
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| SragError::ConfigError(format!("Invalid log level '{}': {}", config.level, e)))?;

    let console_layer = fmt::layer().with_target(false);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SragError::ConfigError(format!("Failed to install logger: {}", e)))?;

    let _ = LOGGER_INIT.set(());
    tracing::info!(log_file = %log_path.display(), "Logger configured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_log_file_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let config = LoggingConfig {
            directory: dir.path().join("logs"),
            file_name: "test.log".to_string(),
            level: "debug".to_string(),
        };

        init(&config).unwrap();
        assert!(config.directory.join("test.log").exists());

        // second call does not try to install another subscriber
        init(&config).unwrap();
    }
}
