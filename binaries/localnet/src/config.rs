//! CLI configuration.
//!
//! Layers, lowest to highest precedence: built-in defaults, the TOML file
//! given with `--config`, the environment, then command-line flags.

use std::path::{Path, PathBuf};

use anyhow::Context;
use localnet_orchestrator::config::{default_base_dir, BASE_DIR_ENV};
use localnet_orchestrator::NetworkDefaults;
use serde::{Deserialize, Serialize};

/// Top-level configuration of the `localnet` binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalnetConfig {
    /// Where networks are stored.
    pub storage: StorageConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Defaults applied to every created network.
    pub network: NetworkDefaults,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of all network directories. Falls back to `$LOCALNET_HOME`, then
    /// `$HOME/.localnet`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json, compact).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl LocalnetConfig {
    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn merge_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(BASE_DIR_ENV).filter(|v| !v.is_empty()) {
            self.storage.base_dir = Some(PathBuf::from(dir));
        }
    }

    /// Merges CLI arguments into the configuration.
    pub fn merge_cli_args(&mut self, args: &super::CliArgs) {
        if let Some(ref dir) = args.base_dir {
            self.storage.base_dir = Some(dir.clone());
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        self.network.validate().context("Invalid network defaults")?;
        Ok(())
    }

    /// Returns the storage root.
    pub fn base_dir(&self) -> anyhow::Result<PathBuf> {
        match self.storage.base_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => Ok(default_base_dir()?),
        }
    }
}
