use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use dimse::DimseConfig;

use crate::config::LoggingConfig;
use crate::storage::StorageConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid DIMSE configuration: {0}")]
    Dimse(#[from] dimse::DimseError),

    #[error("Invalid storage configuration: {0}")]
    Storage(String),

    #[error("Invalid logging configuration: {0}")]
    Logging(String),
}

/// Service configuration, loaded from TOML and overridden from the command line
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dimse: DimseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Read and validate a TOML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&contents)?;
        tracing::debug!(path = %path.display(), "Loaded config from file");
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dimse.validate()?;

        match self.storage.backend.as_str() {
            "redb" | "memory" => {}
            other => {
                return Err(ConfigError::Storage(format!(
                    "unknown backend '{}' (expected 'redb' or 'memory')",
                    other
                )))
            }
        }
        if self.storage.backend == "redb" && self.storage.database_location.as_os_str().is_empty() {
            return Err(ConfigError::Storage(
                "database_location must not be empty".to_string(),
            ));
        }

        tracing_subscriber::EnvFilter::try_new(&self.logging.level)
            .map_err(|e| ConfigError::Logging(format!("level '{}': {}", self.logging.level, e)))?;
        if self.logging.log_to_file && self.logging.log_file_path.trim().is_empty() {
            return Err(ConfigError::Logging(
                "log_file_path is required when log_to_file is set".to_string(),
            ));
        }

        Ok(())
    }
}
