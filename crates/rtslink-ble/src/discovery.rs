//! Robot discovery over BLE
//!
//! Scans for the robot service for the configured time, then lists every
//! peripheral whose advertised local name carries the robot prefix.

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tracing::{debug, info};

use crate::config::BleTransportConfig;
use crate::error::{BleTransportError, Result};
use crate::protocol::{is_robot_name, matches_robot_name, ROBOT_SERVICE_UUID};

/// A robot seen during a scan
#[derive(Debug, Clone)]
pub struct DiscoveredRobot {
    /// Advertised local name, e.g. `Vector-R2D2`
    pub name: String,
    /// Platform address of the peripheral
    pub address: String,
    /// Signal strength at discovery time
    pub rssi: Option<i16>,
    pub peripheral: Peripheral,
}

// ----------------------------------------------------------------------------
// Discovery Implementation
// ----------------------------------------------------------------------------

/// Handles BLE adapter setup and scanning
pub struct BleDiscovery {
    config: BleTransportConfig,
    adapter: Option<Adapter>,
}

impl BleDiscovery {
    /// Create a new discovery manager
    pub fn new(config: BleTransportConfig) -> Self {
        Self {
            config,
            adapter: None,
        }
    }

    /// Initialize the first BLE adapter
    pub async fn initialize_adapter(&mut self) -> Result<()> {
        let manager = Manager::new()
            .await
            .map_err(|e| BleTransportError::Adapter(format!("Failed to create BLE manager: {}", e)))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| BleTransportError::Adapter(format!("Failed to get BLE adapters: {}", e)))?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(BleTransportError::AdapterNotAvailable)?;

        self.adapter = Some(adapter);
        info!("BLE adapter initialized");
        Ok(())
    }

    /// Get adapter reference
    pub fn adapter(&self) -> Option<&Adapter> {
        self.adapter.as_ref()
    }

    /// Scan for robots, sorted by name
    pub async fn scan(&self) -> Result<Vec<DiscoveredRobot>> {
        let adapter = self.adapter.as_ref().ok_or(BleTransportError::AdapterNotAvailable)?;

        adapter
            .start_scan(ScanFilter {
                services: vec![ROBOT_SERVICE_UUID],
            })
            .await
            .map_err(|e| BleTransportError::ScanFailed(format!("Failed to start BLE scan: {}", e)))?;
        info!("Scanning for robots for {:?}", self.config.scan_timeout);

        tokio::time::sleep(self.config.scan_timeout).await;

        adapter
            .stop_scan()
            .await
            .map_err(|e| BleTransportError::ScanFailed(format!("Failed to stop BLE scan: {}", e)))?;

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| BleTransportError::ScanFailed(e.to_string()))?;

        let mut robots = Vec::new();
        for peripheral in peripherals {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            let Some(name) = properties.local_name else {
                continue;
            };
            if !is_robot_name(&name, &self.config.device_name_prefix) {
                continue;
            }
            debug!("Discovered robot {} ({})", name, properties.address);
            robots.push(DiscoveredRobot {
                name,
                address: properties.address.to_string(),
                rssi: properties.rssi,
                peripheral,
            });
        }

        robots.sort_by(|a, b| a.name.cmp(&b.name));
        robots.dedup_by(|a, b| a.address == b.address);
        info!("Found {} robots", robots.len());
        Ok(robots)
    }

    /// Scan and pick the robot matching `name`
    pub async fn find(&self, name: &str) -> Result<DiscoveredRobot> {
        let robots = self.scan().await?;
        robots
            .into_iter()
            .find(|robot| matches_robot_name(&robot.name, name, &self.config.device_name_prefix))
            .ok_or_else(|| BleTransportError::RobotNotFound {
                name: name.to_string(),
            })
    }
}
