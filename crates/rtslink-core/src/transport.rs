//! Transport abstraction
//!
//! The session hands every outbound frame to a `FrameSink`. The BLE crate
//! feeds the sink's receiving end into its write path; tests collect frames in
//! a `Vec`.

use tokio::sync::mpsc;

use crate::errors::{Result, RtsError};

/// Destination for outbound frames
pub trait FrameSink {
    /// Hand one complete frame to the transport
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<()>;
}

impl FrameSink for mpsc::UnboundedSender<Vec<u8>> {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        self.send(frame)
            .map_err(|_| RtsError::transport("Outbound frame channel closed"))
    }
}

impl FrameSink for Vec<Vec<u8>> {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<()> {
        self.push(frame);
        Ok(())
    }
}
