//! TOML-based application configuration.
//!
//! Covers the guard configuration surface (per-guard enabled/required/
//! timeout/overridable), the ordered hook list, and device settings.
//! Stored at `<data_dir>/config.toml`; a missing file yields defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::guards::GuardConfig;
use crate::hooks::HookConfig;
use crate::storage::data_dir;

/// Per-guard options for the four shipped guards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardsConfig {
    #[serde(default)]
    pub paper_session: GuardConfig,
    #[serde(default)]
    pub pen_layer: GuardConfig,
    #[serde(default)]
    pub camera_health: GuardConfig,
    #[serde(default)]
    pub physical_setup: GuardConfig,
}

/// Device settings. The driver itself is an external collaborator; this
/// only records how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_port() -> String {
    "/dev/ttyUSB0".into()
}
fn default_model() -> String {
    "axidraw-v3".into()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            model: default_model(),
        }
    }
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlotConfig {
    #[serde(default)]
    pub guards: GuardsConfig,
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
    #[serde(default)]
    pub device: DeviceConfig,
}

impl PlotConfig {
    /// Path of the config file.
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: "<data_dir>".into(),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load the configuration, falling back to defaults if the file does
    /// not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::LoadFailed {
            path: path.clone(),
            message: e.to_string(),
        })
    }

    /// Save the configuration.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(path, raw).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })
    }
}
