//! Error types for the BLE transport

use rtslink_core::RtsError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the BLE transport
#[derive(Error, Debug)]
pub enum BleTransportError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("BLE adapter error: {0}")]
    Adapter(String),

    #[error("BLE scan failed: {0}")]
    ScanFailed(String),

    #[error("Robot not found: {name}")]
    RobotNotFound { name: String },

    #[error("Failed to connect to robot: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Failed to discover services: {0}")]
    ServiceDiscoveryFailed(String),

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to get notifications stream: {0}")]
    NotificationStreamFailed(String),

    #[error("Malformed multipart packet: {reason}")]
    Framing { reason: String },

    #[error("Invalid transport configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

impl BleTransportError {
    pub fn framing(reason: impl Into<String>) -> Self {
        Self::Framing {
            reason: reason.into(),
        }
    }
}

impl From<BleTransportError> for RtsError {
    fn from(err: BleTransportError) -> Self {
        RtsError::transport(err.to_string())
    }
}

/// Result type for BLE transport operations
pub type Result<T> = core::result::Result<T, BleTransportError>;
