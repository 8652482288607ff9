//! Session Configuration
//!
//! Tunables for the pairing state machine, the request correlator and the
//! async client runtime.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RtsError};
use crate::protocol::correlator::OverlapPolicy;
use crate::protocol::messages::CommandKind;

// ----------------------------------------------------------------------------
// Timeout Configuration
// ----------------------------------------------------------------------------

/// Per-command response timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default timeout for commands without a specific entry
    pub command_secs: u64,
    /// Status requests
    pub status_secs: u64,
    /// Wifi scans take a while on the robot side
    pub wifi_scan_secs: u64,
    /// Wifi connect waits for association and DHCP
    pub wifi_connect_secs: u64,
    /// Cloud session authorization
    pub cloud_session_secs: u64,
    /// Waiting for the next OTA progress report
    pub ota_secs: u64,
    /// Log bundle download, measured to the last packet
    pub logs_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_secs: 10,
            status_secs: 5,
            wifi_scan_secs: 15,
            wifi_connect_secs: 30,
            cloud_session_secs: 20,
            ota_secs: 30,
            logs_secs: 120,
        }
    }
}

impl TimeoutConfig {
    /// Timeout to apply to a command of `kind`
    pub fn for_kind(&self, kind: CommandKind) -> Duration {
        let secs = match kind {
            CommandKind::Status => self.status_secs,
            CommandKind::WifiScan => self.wifi_scan_secs,
            CommandKind::WifiConnect => self.wifi_connect_secs,
            CommandKind::CloudSession => self.cloud_session_secs,
            CommandKind::Ota => self.ota_secs,
            CommandKind::Logs => self.logs_secs,
            _ => self.command_secs,
        };
        Duration::from_secs(secs)
    }

    /// Short timeouts for tests
    pub fn testing() -> Self {
        Self {
            command_secs: 1,
            status_secs: 1,
            wifi_scan_secs: 1,
            wifi_connect_secs: 1,
            cloud_session_secs: 1,
            ota_secs: 1,
            logs_secs: 1,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for one robot session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Required PIN length; any non-empty digit string is accepted when unset
    pub pin_digits: Option<usize>,
    /// Behaviour when a kind already has a pending request
    pub overlap_policy: OverlapPolicy,
    /// Response timeouts
    pub timeouts: TimeoutConfig,
    /// Abort a chunked transfer that grows beyond this many bytes
    pub max_transfer_bytes: Option<usize>,
    /// Answer a connection request with saved keys when the store has them
    pub reuse_saved_sessions: bool,
    /// Save keys after a first-time pairing completes
    pub persist_sessions: bool,
    /// Capacity of the client command channel
    pub command_buffer_size: usize,
    /// Capacity of the session event channel
    pub event_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pin_digits: None,
            overlap_policy: OverlapPolicy::Replace,
            timeouts: TimeoutConfig::default(),
            max_transfer_bytes: Some(16 * 1024 * 1024),
            reuse_saved_sessions: true,
            persist_sessions: true,
            command_buffer_size: 32,
            event_buffer_size: 64,
        }
    }
}

impl SessionConfig {
    /// Create configuration for testing with short timeouts
    pub fn testing() -> Self {
        Self {
            timeouts: TimeoutConfig::testing(),
            ..Self::default()
        }
    }

    pub fn with_pin_digits(mut self, digits: Option<usize>) -> Self {
        self.pin_digits = digits;
        self
    }

    pub fn with_overlap_policy(mut self, policy: OverlapPolicy) -> Self {
        self.overlap_policy = policy;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_max_transfer_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_transfer_bytes = limit;
        self
    }

    pub fn with_saved_sessions(mut self, reuse: bool, persist: bool) -> Self {
        self.reuse_saved_sessions = reuse;
        self.persist_sessions = persist;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.pin_digits == Some(0) {
            return Err(RtsError::config_error("pin_digits must be at least 1"));
        }
        if self.max_transfer_bytes == Some(0) {
            return Err(RtsError::config_error("max_transfer_bytes must be positive"));
        }
        if self.command_buffer_size == 0 || self.event_buffer_size == 0 {
            return Err(RtsError::config_error("channel buffers must be non-empty"));
        }
        let t = &self.timeouts;
        let all = [
            t.command_secs,
            t.status_secs,
            t.wifi_scan_secs,
            t.wifi_connect_secs,
            t.cloud_session_secs,
            t.ota_secs,
            t.logs_secs,
        ];
        if all.iter().any(|secs| *secs == 0) {
            return Err(RtsError::config_error("timeouts must be at least one second"));
        }
        Ok(())
    }
}
