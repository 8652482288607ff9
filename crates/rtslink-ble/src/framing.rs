//! Multipart framing for the BLE link
//!
//! Protocol frames are usually larger than one GATT write. Each frame is split
//! into packets carrying a one-byte header: bits 7..6 give the packet's place
//! in the frame and bits 5..0 the payload length.
//!
//! | bits 7..6 | meaning  |
//! |-----------|----------|
//! | `10`      | start    |
//! | `00`      | continue |
//! | `01`      | end      |
//! | `11`      | solo     |

use tracing::warn;

use crate::error::{BleTransportError, Result};

/// Largest payload a six-bit length field can describe
pub const MAX_PAYLOAD_PER_PACKET: usize = 0x3F;

const KIND_MASK: u8 = 0b1100_0000;
const LENGTH_MASK: u8 = 0b0011_1111;

// ----------------------------------------------------------------------------
// Packet Kind
// ----------------------------------------------------------------------------

/// Position of a packet within its frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Start,
    Continue,
    End,
    Solo,
}

impl PacketKind {
    fn from_header(header: u8) -> Self {
        match header & KIND_MASK {
            0b1000_0000 => PacketKind::Start,
            0b0000_0000 => PacketKind::Continue,
            0b0100_0000 => PacketKind::End,
            _ => PacketKind::Solo,
        }
    }

    fn header_bits(self) -> u8 {
        match self {
            PacketKind::Start => 0b1000_0000,
            PacketKind::Continue => 0b0000_0000,
            PacketKind::End => 0b0100_0000,
            PacketKind::Solo => 0b1100_0000,
        }
    }
}

fn packet(kind: PacketKind, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + 1);
    packet.push(kind.header_bits() | (payload.len() as u8 & LENGTH_MASK));
    packet.extend_from_slice(payload);
    packet
}

// ----------------------------------------------------------------------------
// Splitting
// ----------------------------------------------------------------------------

/// Split one frame into packets of at most `max_packet_size` bytes
///
/// `max_packet_size` must leave room for the header and at least one payload
/// byte; `BleTransportConfig::validate` enforces this.
pub fn split_frame(frame: &[u8], max_packet_size: usize) -> Vec<Vec<u8>> {
    let per_packet = max_packet_size
        .saturating_sub(1)
        .clamp(1, MAX_PAYLOAD_PER_PACKET);

    if frame.len() <= per_packet {
        return vec![packet(PacketKind::Solo, frame)];
    }

    let chunks: Vec<&[u8]> = frame.chunks(per_packet).collect();
    let last = chunks.len() - 1;
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let kind = match i {
                0 => PacketKind::Start,
                i if i == last => PacketKind::End,
                _ => PacketKind::Continue,
            };
            packet(kind, chunk)
        })
        .collect()
}

// ----------------------------------------------------------------------------
// Reassembly
// ----------------------------------------------------------------------------

/// Rebuilds frames from inbound packets
#[derive(Debug, Default)]
pub struct MultipartReassembler {
    partial: Option<Vec<u8>>,
}

impl MultipartReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet, returning a frame when it completes one
    ///
    /// A malformed packet discards any partial frame.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some((&header, body)) = packet.split_first() else {
            self.partial = None;
            return Err(BleTransportError::framing("empty packet"));
        };

        let length = (header & LENGTH_MASK) as usize;
        if length > body.len() {
            self.partial = None;
            return Err(BleTransportError::framing(format!(
                "header declares {} payload bytes, packet carries {}",
                length,
                body.len()
            )));
        }
        let payload = &body[..length];

        match PacketKind::from_header(header) {
            PacketKind::Solo => {
                self.discard_partial("solo");
                Ok(Some(payload.to_vec()))
            }
            PacketKind::Start => {
                self.discard_partial("start");
                self.partial = Some(payload.to_vec());
                Ok(None)
            }
            PacketKind::Continue => match self.partial.as_mut() {
                Some(partial) => {
                    partial.extend_from_slice(payload);
                    Ok(None)
                }
                None => Err(BleTransportError::framing("continue packet without start")),
            },
            PacketKind::End => match self.partial.take() {
                Some(mut frame) => {
                    frame.extend_from_slice(payload);
                    Ok(Some(frame))
                }
                None => Err(BleTransportError::framing("end packet without start")),
            },
        }
    }

    /// Whether a frame is partially received
    pub fn in_progress(&self) -> bool {
        self.partial.is_some()
    }

    fn discard_partial(&mut self, kind: &str) {
        if let Some(partial) = self.partial.take() {
            warn!(
                "Discarding {} byte partial frame on {} packet",
                partial.len(),
                kind
            );
        }
    }
}
