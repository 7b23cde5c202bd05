use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::decoder::{DecoderError, Thresholds};

const DEFAULT_CONFIG: &str = r#"# morse-key configuration

[decoder]
# Longest press (ms) still read as a dot; anything longer is a dash
dot_max_ms = 150
# Silence (ms) after the last release that commits a letter
letter_gap_ms = 800
# Silence (ms) after the last release that ends a word
word_gap_ms = 1500

[telemetry]
enabled = false
log_path = "~/.morse-key/morse-key.log"
level = "info"
"#;

/// Top-level configuration file
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Timing thresholds
    pub decoder: DecoderConfig,
    /// Logging
    pub telemetry: TelemetryConfig,
}

/// Decoder timing thresholds in milliseconds
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DecoderConfig {
    /// Longest press read as a dot
    pub dot_max_ms: u64,
    /// Silence that commits a letter
    pub letter_gap_ms: u64,
    /// Silence that ends a word
    pub word_gap_ms: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        let defaults = Thresholds::default();
        Self {
            dot_max_ms: defaults.dot_max_ms(),
            letter_gap_ms: defaults.letter_gap_ms(),
            word_gap_ms: defaults.word_gap_ms(),
        }
    }
}

impl DecoderConfig {
    /// Validate into decoder thresholds
    ///
    /// # Errors
    /// Returns [`DecoderError::ConfigurationInvalid`] if the values are out of order or zero
    pub fn thresholds(&self) -> Result<Thresholds, DecoderError> {
        Thresholds::try_from(self)
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Write logs to `log_path` instead of stdout
    pub enabled: bool,
    /// Log file, `~` expanded
    pub log_path: String,
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: "~/.morse-key/morse-key.log".to_owned(),
            level: "info".to_owned(),
        }
    }
}

impl Config {
    /// Load config from ~/.morse-key.toml, creating a default file on first run
    ///
    /// # Errors
    /// Returns error if HOME is unset or the file cannot be written, read or parsed
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
            tracing::info!(path = %config_path.display(), "wrote default config");
        }

        Self::load_from(&config_path)
    }

    /// Load config from an explicit path
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate config TOML
    ///
    /// # Errors
    /// Returns error on malformed TOML, unknown decoder fields or invalid thresholds
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("failed to parse config TOML")?;
        config
            .decoder
            .thresholds()
            .context("invalid [decoder] thresholds")?;
        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".morse-key.toml"))
    }

    fn create_default(path: &Path) -> Result<()> {
        fs::write(path, DEFAULT_CONFIG).context("failed to write default config")?;
        Ok(())
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if the path starts with `~/` and HOME is unset
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}
