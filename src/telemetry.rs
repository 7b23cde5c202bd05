use anyhow::{anyhow, Context, Result};
use std::fs::{self, OpenOptions};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, TelemetryConfig};

/// Build the log filter: `RUST_LOG` wins, otherwise the configured level
fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level {level:?}"))
}

/// Initialize tracing output
///
/// Logs go to stdout unless telemetry is enabled, in which case they are
/// appended to the configured log file.
///
/// # Errors
/// Returns error if the level is invalid, the log file cannot be opened, or a
/// global subscriber is already installed
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let filter = build_filter(&config.level)?;

    if !config.enabled {
        return tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"));
    }

    let expanded_path = Config::expand_path(&config.log_path)?;

    // Create parent directory if needed
    if let Some(parent) = expanded_path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&expanded_path)
        .context("failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!("telemetry initialized: {}", expanded_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_levels() {
        assert!(build_filter("debug").is_ok());
        assert!(build_filter("morse_key=trace,warn").is_ok());
    }

    #[test]
    #[ignore] // Installs a global tracing subscriber (can only init once per process)
    fn test_init_stdout() {
        let config = TelemetryConfig::default();
        assert!(init(&config).is_ok());
    }

    #[test]
    #[ignore] // Requires filesystem access and global tracing subscriber initialization
    fn test_init_with_log_file() {
        let config = TelemetryConfig {
            enabled: true,
            log_path: std::env::temp_dir()
                .join("morse_key_telemetry_test/key.log")
                .display()
                .to_string(),
            level: "info".to_owned(),
        };
        assert!(init(&config).is_ok());
    }
}
