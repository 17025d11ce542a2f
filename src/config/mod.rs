//! Configuration module for tomoflow
//!
//! Engine settings are read from a TOML file. Every key is optional; missing
//! sections fall back to their defaults.
//!
//! # Default Location
//!
//! - **Linux**: `~/.config/org.tomoflow/engine.toml`
//! - **macOS**: `~/Library/Application Support/org.tomoflow/engine.toml`
//! - **Windows**: `%APPDATA%\org.tomoflow\engine.toml`
//!
//! # Example
//!
//! ```toml
//! [queue]
//! capacity = 8
//!
//! [compute]
//! policy = "per_node"
//! backend = "emulated"
//!
//! [run]
//! frames = 100
//! roi = { x = 500, y = 500, width = 256, height = 256 }
//! pipe = "/tmp/frames.fifo"
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{Result, ResultExt, TomoflowError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "org.tomoflow";

/// Engine config filename
pub const CONFIG_FILE: &str = "engine.toml";

/// Get the default engine config path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: QueueSettings,
    pub compute: ComputeSettings,
    pub pool: PoolSettings,
    pub logging: LoggingSettings,
    pub run: RunSettings,
}

impl EngineConfig {
    /// Parse a config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| TomoflowError::Config(format!("Failed to parse engine config: {}", e)))
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TomoflowError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content).with_context(|| format!("In {}", path.display()))
    }

    /// Load from `path`, or from the default location when `path` is `None`.
    /// A missing default file yields the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Save the config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TomoflowError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TomoflowError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            TomoflowError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}
