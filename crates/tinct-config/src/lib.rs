//! Configuration for the tinct plug-in host.
//!
//! Supports TOML configuration files with sensible defaults. The config file
//! is optional - the host works with zero config.
//!
//! # Config file locations
//!
//! Priority order:
//! 1. `$TINCT_CONFIG` environment variable
//! 2. `~/.config/tinct/config.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct TinctConfig {
    pub plugin: PluginConfig,
    pub host: HostConfig,
    pub dither: DitherConfig,
}

/// Plug-in discovery settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct PluginConfig {
    /// Directories searched for plug-in executables, in order.
    pub search_dirs: Vec<PathBuf>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            search_dirs: vec![PathBuf::from("plug-ins")],
        }
    }
}

/// Host behavior settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct HostConfig {
    /// Free shadow buffers eagerly after a merge.
    pub low_memory: bool,
    /// Auto-dismiss deadline for plug-in notices, in milliseconds.
    pub notice_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            low_memory: false,
            notice_timeout_ms: 8_000,
        }
    }
}

/// Dither engine scheduling settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct DitherConfig {
    /// Delay before a pass's first scanline, so content about to be
    /// scrolled away is not dithered.
    pub initial_delay_ms: u64,
}

impl Default for DitherConfig {
    fn default() -> Self {
        DitherConfig {
            initial_delay_ms: 100,
        }
    }
}

impl TinctConfig {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if no config file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        log::info!("Loading config from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: TinctConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the config file path based on environment and platform.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("TINCT_CONFIG") {
            return PathBuf::from(path);
        }

        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".config/tinct/config.toml")
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.notice_timeout_ms == 0 || self.host.notice_timeout_ms > 120_000 {
            return Err(ConfigError::ValidationError(format!(
                "host.notice_timeout_ms must be between 1 and 120000, got {}",
                self.host.notice_timeout_ms
            )));
        }

        if self.dither.initial_delay_ms > 10_000 {
            return Err(ConfigError::ValidationError(format!(
                "dither.initial_delay_ms must be <= 10000, got {}",
                self.dither.initial_delay_ms
            )));
        }

        Ok(())
    }

    /// Notice auto-dismiss deadline as a [`Duration`].
    pub fn notice_timeout(&self) -> Duration {
        Duration::from_millis(self.host.notice_timeout_ms)
    }

    /// Dither initial delay as a [`Duration`].
    pub fn dither_delay(&self) -> Duration {
        Duration::from_millis(self.dither.initial_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
