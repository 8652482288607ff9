//! rtslink CLI configuration
//!
//! Configuration is read from a TOML file: the path given with `--config`, or
//! `rtslink/config.toml` under the platform config directory when it exists.
//! Every section and field is optional and falls back to its default.

use std::path::{Path, PathBuf};

use rtslink_ble::BleTransportConfig;
use rtslink_core::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CliError, Result};

const APP_DIR: &str = "rtslink";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Protocol session settings
    pub session: SessionConfig,
    /// BLE transport settings
    pub ble: BleTransportConfig,
    /// Where keys and downloads are kept
    pub storage: StorageConfig,
    /// Logging settings
    pub log: LogConfig,
}

/// File locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Key store file; defaults to `rtslink/keys.json` in the data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_store: Option<PathBuf>,
    /// Directory completed log downloads are written to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log at debug level
    pub verbose: bool,
}

impl AppConfig {
    /// Load from `path`, or from the default location when it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => match Self::default_config_path() {
                Some(path) if path.exists() => Self::load_from_file(&path),
                _ => {
                    info!("Using default configuration");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Loading configuration from {}", path.as_ref().display());
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.ble.validate()?;
        if let Some(dir) = &self.storage.download_dir {
            if dir.is_file() {
                return Err(CliError::Config(format!(
                    "download_dir {} is a file",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Default configuration file location
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Key store file to use
    pub fn key_store_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.key_store {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR).join("keys.json"))
            .ok_or_else(|| CliError::Config("No data directory; set storage.key_store".to_string()))
    }

    /// Directory to write log downloads to
    pub fn download_dir(&self) -> PathBuf {
        self.storage
            .download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Render a configuration file with every default filled in
    pub fn example_config() -> Result<String> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }
}
