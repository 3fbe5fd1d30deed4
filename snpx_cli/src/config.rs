/*!
Configuration management for the snpx command-line client.
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use snpx::position::PositionKind;
use snpx::ClientConfig;
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub controller: ClientConfig,
    pub poll: PollConfig,
    pub serve: ServeConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        config.controller.validate()?;
        Ok(config)
    }

    /// Load the file when it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

/// Position polling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Delay between two samples in milliseconds
    pub interval_ms: u64,

    /// Stop after this many samples; 0 polls until Ctrl+C
    pub max_samples: u64,

    /// Which position representation to sample
    pub kind: PositionKind,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            max_samples: 0,
            kind: PositionKind::Joint,
        }
    }
}

/// Simulator server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// TCP bind address
    pub bind_addr: String,

    /// TCP port to listen on
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: snpx::protocol::DEFAULT_PORT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_roundtrip() {
        let mut original_config = AppConfig::new();
        original_config.controller.host = "192.168.1.10".to_string();
        original_config.poll.kind = PositionKind::Cartesian;

        let temp_file = NamedTempFile::new().unwrap();
        let temp_path = temp_file.path();

        original_config.save_to_file(temp_path).unwrap();
        let loaded_config = AppConfig::load_from_file(temp_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[controller]\nhost = \"10.0.0.7\"\n").unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.controller.host, "10.0.0.7");
        assert_eq!(config.controller.port, 60008);
        assert_eq!(config.poll.interval_ms, 100);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[controller]\naxis_count = 0\n").unwrap();
        assert!(AppConfig::load_from_file(temp_file.path()).is_err());

        std::fs::write(temp_file.path(), "not toml at all [").unwrap();
        assert!(AppConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::new());
    }
}
