//! BLE connection management and data transmission
//!
//! A connected robot is exposed as two frame channels: notifications on the
//! read characteristic are reassembled into whole frames and pushed into an
//! `mpsc::Receiver`, and whole frames sent into an `mpsc::UnboundedSender` are
//! split into packets and written without response. These are exactly the
//! channels `rtslink_core::spawn_session` consumes.

use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::BleTransportConfig;
use crate::discovery::DiscoveredRobot;
use crate::error::{BleTransportError, Result};
use crate::framing::{split_frame, MultipartReassembler};
use crate::protocol::{ROBOT_READ_CHARACTERISTIC_UUID, ROBOT_WRITE_CHARACTERISTIC_UUID};

// ----------------------------------------------------------------------------
// Connected Link
// ----------------------------------------------------------------------------

/// Frame channels of a connected robot
pub struct RobotLink {
    /// Whole frames received from the robot
    pub inbound: mpsc::Receiver<Vec<u8>>,
    /// Whole frames to write to the robot
    pub outbound: mpsc::UnboundedSender<Vec<u8>>,
    /// Keeps the link alive and tears it down
    pub handle: LinkHandle,
}

/// Owner of the background tasks of one link
pub struct LinkHandle {
    name: String,
    peripheral: Peripheral,
    pump: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LinkHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop both tasks and disconnect from the robot
    pub async fn disconnect(self) {
        self.pump.abort();
        self.writer.abort();
        if let Err(e) = self.peripheral.disconnect().await {
            error!("Failed to disconnect from {}: {}", self.name, e);
        }
        info!("Disconnected from {}", self.name);
    }
}

// ----------------------------------------------------------------------------
// Connection Management
// ----------------------------------------------------------------------------

/// Connects to robots and wires up their frame channels
pub struct BleConnection {
    config: BleTransportConfig,
}

impl BleConnection {
    /// Create a new connection manager
    pub fn new(config: BleTransportConfig) -> Self {
        Self { config }
    }

    /// Connect, discover services and start the notification pump and writer
    pub async fn connect(&self, robot: &DiscoveredRobot) -> Result<RobotLink> {
        self.config.validate()?;
        let peripheral = robot.peripheral.clone();

        match timeout(self.config.connection_timeout, peripheral.connect()).await {
            Ok(Ok(())) => info!("Connected to robot {}", robot.name),
            Ok(Err(e)) => {
                error!("Failed to connect to robot {}: {}", robot.name, e);
                return Err(BleTransportError::ConnectionFailed(e.to_string()));
            }
            Err(_) => {
                error!("Connection to robot {} timed out", robot.name);
                return Err(BleTransportError::ConnectionTimeout);
            }
        }

        let setup = self.set_up_link(robot, &peripheral);
        let release = async {
            if let Err(e) = peripheral.disconnect().await {
                error!("Failed to disconnect from {} after setup error: {}", robot.name, e);
            }
        };
        release_on_error(setup, release).await
    }

    /// Discover services, subscribe and start the link tasks on a connected peripheral
    async fn set_up_link(&self, robot: &DiscoveredRobot, peripheral: &Peripheral) -> Result<RobotLink> {
        if let Err(e) = peripheral.discover_services().await {
            error!("Failed to discover services for {}: {}", robot.name, e);
            return Err(BleTransportError::ServiceDiscoveryFailed(e.to_string()));
        }

        let read_char = find_characteristic(peripheral, ROBOT_READ_CHARACTERISTIC_UUID, "read")?;
        let write_char = find_characteristic(peripheral, ROBOT_WRITE_CHARACTERISTIC_UUID, "write")?;

        peripheral
            .subscribe(&read_char)
            .await
            .map_err(|e| BleTransportError::SubscriptionFailed(e.to_string()))?;

        let (frame_tx, inbound) = mpsc::channel(self.config.frame_buffer_size);
        let pump = self.start_notification_pump(&robot.name, peripheral, frame_tx).await?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer = self.start_writer(&robot.name, peripheral, write_char, outbound_rx);

        Ok(RobotLink {
            inbound,
            outbound,
            handle: LinkHandle {
                name: robot.name.clone(),
                peripheral: peripheral.clone(),
                pump,
                writer,
            },
        })
    }

    /// Reassemble notifications into frames until the stream ends
    async fn start_notification_pump(
        &self,
        name: &str,
        peripheral: &Peripheral,
        frame_tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<JoinHandle<()>> {
        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(|e| BleTransportError::NotificationStreamFailed(e.to_string()))?;
        let name = name.to_string();

        Ok(tokio::spawn(async move {
            let mut reassembler = MultipartReassembler::new();
            while let Some(notification) = notifications.next().await {
                if notification.uuid != ROBOT_READ_CHARACTERISTIC_UUID {
                    continue;
                }
                match reassembler.push(&notification.value) {
                    Ok(Some(frame)) => {
                        if frame_tx.send(frame).await.is_err() {
                            debug!("Frame receiver for {} dropped", name);
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Dropping packet from {}: {}", name, e),
                }
            }
            // Dropping frame_tx closes the session's inbound channel
            debug!("Notification pump for {} ended", name);
        }))
    }

    /// Write outbound frames as multipart packets
    fn start_writer(
        &self,
        name: &str,
        peripheral: &Peripheral,
        write_char: Characteristic,
        mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> JoinHandle<()> {
        let peripheral = peripheral.clone();
        let max_packet_size = self.config.max_packet_size;
        let name = name.to_string();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                for packet in split_frame(&frame, max_packet_size) {
                    if let Err(e) = peripheral
                        .write(&write_char, &packet, WriteType::WithoutResponse)
                        .await
                    {
                        error!("Failed to write to {}: {}", name, e);
                        return;
                    }
                }
                debug!("Wrote {} byte frame to {}", frame.len(), name);
            }
            debug!("Writer for {} ended", name);
        })
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    uuid: uuid::Uuid,
    label: &str,
) -> Result<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or_else(|| BleTransportError::CharacteristicNotFound {
            characteristic: format!("{} ({})", label, uuid),
        })
}

/// Await `setup`; if it fails, await `release` before handing back the error
async fn release_on_error<T, S, R>(setup: S, release: R) -> Result<T>
where
    S: Future<Output = Result<T>>,
    R: Future<Output = ()>,
{
    match setup.await {
        Ok(value) => Ok(value),
        Err(e) => {
            release.await;
            Err(e)
        }
    }
}
