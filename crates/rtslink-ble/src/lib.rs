//! Bluetooth Low Energy transport for rtslink
//!
//! This crate connects to a robot's GATT service with btleplug and exposes the
//! link as whole-frame channels ready for `rtslink_core::spawn_session`.
//!
//! ## Architecture
//!
//! - [`config`] - Transport configuration and settings
//! - [`error`] - Error types specific to the BLE transport
//! - [`protocol`] - Service and characteristic UUIDs, robot names
//! - [`framing`] - Multipart packet framing
//! - [`discovery`] - Adapter setup and robot scanning
//! - [`connection`] - Connection, notification pump and write path
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rtslink_ble::{BleConnection, BleDiscovery, BleTransportConfig};
//! use rtslink_core::{spawn_session, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BleTransportConfig::new();
//! let mut discovery = BleDiscovery::new(config.clone());
//! discovery.initialize_adapter().await?;
//!
//! let robot = discovery.find("Vector-R2D2").await?;
//! let link = BleConnection::new(config).connect(&robot).await?;
//!
//! let (_client, _events, _task) = spawn_session(
//!     SessionConfig::default(),
//!     robot.name.clone(),
//!     link.inbound,
//!     link.outbound,
//!     None,
//! );
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod framing;
pub mod protocol;

// Public API exports
pub use config::BleTransportConfig;
pub use connection::{BleConnection, LinkHandle, RobotLink};
pub use discovery::{BleDiscovery, DiscoveredRobot};
pub use error::BleTransportError;
pub use framing::{split_frame, MultipartReassembler};
pub use protocol::{
    ROBOT_READ_CHARACTERISTIC_UUID, ROBOT_SERVICE_UUID, ROBOT_WRITE_CHARACTERISTIC_UUID,
};
