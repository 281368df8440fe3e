//! VPN Subsystem Settings
//!
//! Loaded from TOML or JSON; every field has a default so an empty file
//! is a valid configuration.
//!
//! ```toml
//! store_path = "/tmp/fos-wb/vpn-prefs.json"
//! restart_on_loss = true
//!
//! [resilience]
//! losses_per_attempt = 3
//! max_attempts = 3
//! ```

use crate::resilience::ResiliencePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings for the tunnel subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnSettings {
    /// Where registry and resilience state are persisted
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    /// Initial value of the "restart on connectivity loss" toggle until
    /// remote config says otherwise
    #[serde(default = "default_true")]
    pub restart_on_loss: bool,
    /// Escalation thresholds
    #[serde(default)]
    pub resilience: ResiliencePolicy,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/tmp/fos-wb/vpn-prefs.json")
}

fn default_true() -> bool {
    true
}

impl Default for VpnSettings {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            restart_on_loss: true,
            resilience: ResiliencePolicy::default(),
        }
    }
}

impl VpnSettings {
    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Export as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resilience.losses_per_attempt == 0 {
            return Err(ConfigError::Invalid("losses_per_attempt must be at least 1".into()));
        }
        if self.resilience.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.store_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store_path is empty".into()));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}
