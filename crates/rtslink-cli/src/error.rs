//! Error handling for the rtslink CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Protocol error: {0}")]
    Core(#[from] rtslink_core::RtsError),

    #[error("BLE transport error: {0}")]
    Ble(#[from] rtslink_ble::BleTransportError),

    #[error("Command failed: {0}")]
    Command(#[from] rtslink_core::CommandError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
