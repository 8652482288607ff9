//! Wire codec for robot transport messages
//!
//! Two frame shapes exist on the link. The raw version handshake is a fixed
//! 5-byte frame sent before any envelope traffic and never encrypted. Every
//! other frame is a packed `ExternalComms` envelope, produced and consumed
//! through a `MessageCodec`.

use crate::errors::{PacketError, Result};

use super::messages::{ExternalComms, RtsMessage};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// First byte of a raw version handshake frame
pub const SETUP_MSG_HANDSHAKE: u8 = 1;

/// Length of a raw version handshake frame
pub const HANDSHAKE_FRAME_LEN: usize = 5;

// ----------------------------------------------------------------------------
// Version Handshake
// ----------------------------------------------------------------------------

/// Encode the raw handshake frame announcing `version`
pub fn encode_handshake(version: u32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HANDSHAKE_FRAME_LEN);
    frame.push(SETUP_MSG_HANDSHAKE);
    frame.extend_from_slice(&version.to_le_bytes());
    frame
}

/// Decode a raw handshake frame, returning the announced version
pub fn decode_handshake(frame: &[u8]) -> Result<u32> {
    if frame.len() != HANDSHAKE_FRAME_LEN {
        return Err(PacketError::TooShort {
            expected: HANDSHAKE_FRAME_LEN,
            actual: frame.len(),
        }
        .into());
    }
    if frame[0] != SETUP_MSG_HANDSHAKE {
        return Err(PacketError::NotHandshake { first: frame[0] }.into());
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&frame[1..]);
    Ok(u32::from_le_bytes(version))
}

/// Whether a raw frame has the shape of a version handshake
pub fn is_handshake_frame(frame: &[u8]) -> bool {
    frame.len() == HANDSHAKE_FRAME_LEN && frame[0] == SETUP_MSG_HANDSHAKE
}

// ----------------------------------------------------------------------------
// Message Codec
// ----------------------------------------------------------------------------

/// Pack/unpack of the envelope-wrapped message set
pub trait MessageCodec {
    /// Serialize a message inside the current envelopes
    fn pack(&self, message: &RtsMessage) -> Result<Vec<u8>>;

    /// Deserialize an envelope back to its message
    fn unpack(&self, bytes: &[u8]) -> Result<RtsMessage>;
}

/// Default codec: bincode over the `ExternalComms` envelope
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl MessageCodec for BincodeCodec {
    fn pack(&self, message: &RtsMessage) -> Result<Vec<u8>> {
        let envelope = ExternalComms::wrap(message.clone());
        Ok(bincode::serialize(&envelope)?)
    }

    fn unpack(&self, bytes: &[u8]) -> Result<RtsMessage> {
        if bytes.is_empty() {
            return Err(PacketError::TooShort {
                expected: 1,
                actual: 0,
            }
            .into());
        }
        let envelope: ExternalComms = bincode::deserialize(bytes)?;
        Ok(envelope.into_message())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
