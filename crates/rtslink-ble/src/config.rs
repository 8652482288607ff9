//! BLE transport configuration

use std::time::Duration;

use crate::error::{BleTransportError, Result};
use crate::framing::MAX_PAYLOAD_PER_PACKET;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the BLE transport
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BleTransportConfig {
    /// How long to scan before listing robots
    pub scan_timeout: Duration,
    /// Maximum time to wait for a connection
    pub connection_timeout: Duration,
    /// Largest packet written to the robot, header included
    pub max_packet_size: usize,
    /// Local name prefix advertised by robots
    pub device_name_prefix: String,
    /// Capacity of the channel carrying reassembled inbound frames
    pub frame_buffer_size: usize,
}

impl Default for BleTransportConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(10),
            max_packet_size: 20,
            device_name_prefix: "Vector".to_string(),
            frame_buffer_size: 64,
        }
    }
}

impl BleTransportConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set scan timeout
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set maximum packet size
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Set device name prefix
    pub fn with_device_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.device_name_prefix = prefix.into();
        self
    }

    /// Reject settings the multipart framing cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.max_packet_size < 2 || self.max_packet_size > MAX_PAYLOAD_PER_PACKET + 1 {
            return Err(BleTransportError::InvalidConfiguration {
                reason: format!(
                    "max_packet_size must be between 2 and {}, got {}",
                    MAX_PAYLOAD_PER_PACKET + 1,
                    self.max_packet_size
                ),
            });
        }
        if self.frame_buffer_size == 0 {
            return Err(BleTransportError::InvalidConfiguration {
                reason: "frame_buffer_size must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
