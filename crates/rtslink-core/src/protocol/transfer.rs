//! Chunked Transfer Reassembler
//!
//! Large payloads (log bundles) arrive as a sequence of `FileDownload`
//! packets. One transfer is tracked at a time; chunks are appended in arrival
//! order and the transfer completes on the packet whose number equals the
//! declared total.

use tracing::{debug, warn};

use crate::errors::TransferError;

// ----------------------------------------------------------------------------
// Types
// ----------------------------------------------------------------------------

/// One packet of a chunked transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    pub file_id: u32,
    pub packet_number: u32,
    pub packet_total: u32,
    pub data: Vec<u8>,
}

/// A fully reassembled transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub file_id: u32,
    pub data: Vec<u8>,
    /// Number of packets that made up the transfer
    pub packets: u32,
}

#[derive(Debug)]
struct Accumulator {
    file_id: u32,
    chunks: Vec<Vec<u8>>,
    packet_total: u32,
    received: u32,
    bytes: usize,
}

impl Accumulator {
    fn new(file_id: u32) -> Self {
        Self {
            file_id,
            chunks: Vec::new(),
            packet_total: 0,
            received: 0,
            bytes: 0,
        }
    }

    fn finish(self) -> CompletedTransfer {
        CompletedTransfer {
            file_id: self.file_id,
            data: self.chunks.concat(),
            packets: self.received,
        }
    }
}

// ----------------------------------------------------------------------------
// Reassembler
// ----------------------------------------------------------------------------

/// Reassembles at most one in-flight transfer
#[derive(Debug, Default)]
pub struct TransferReassembler {
    current: Option<Accumulator>,
    /// Transfer abandoned for size; its remaining packets are discarded
    aborted: Option<u32>,
    max_transfer_bytes: Option<usize>,
}

impl TransferReassembler {
    /// Create a new reassembler with no size cap
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the total size of a single transfer
    pub fn with_max_transfer_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_transfer_bytes = limit;
        self
    }

    /// Track `file_id` before its first packet arrives
    pub fn expect(&mut self, file_id: u32) {
        if let Some(previous) = self.current.as_ref() {
            if previous.file_id != file_id {
                warn!(
                    "Dropping unfinished transfer {} ({} packets) for new transfer {}",
                    previous.file_id, previous.received, file_id
                );
            }
        }
        self.aborted = None;
        self.current = Some(Accumulator::new(file_id));
    }

    /// Accept one packet, returning the completed transfer on the terminal packet
    pub fn accept(
        &mut self,
        chunk: FileChunk,
    ) -> core::result::Result<Option<CompletedTransfer>, TransferError> {
        if self.current.is_none() {
            match self.aborted {
                Some(file_id) if file_id == chunk.file_id => {
                    debug!(
                        "Discarding packet {} of aborted transfer {}",
                        chunk.packet_number, file_id
                    );
                    return Ok(None);
                }
                Some(_) => self.aborted = None,
                None => {}
            }
        }

        let accumulator = self
            .current
            .get_or_insert_with(|| Accumulator::new(chunk.file_id));

        if accumulator.file_id != chunk.file_id {
            debug!(
                "Ignoring packet for transfer {} while {} is in flight",
                chunk.file_id, accumulator.file_id
            );
            return Ok(None);
        }

        if chunk.packet_number != accumulator.received + 1 {
            debug!(
                "Transfer {} packet {} arrived after {} packets",
                chunk.file_id, chunk.packet_number, accumulator.received
            );
        }

        accumulator.bytes += chunk.data.len();
        if let Some(limit) = self.max_transfer_bytes {
            if accumulator.bytes > limit {
                let file_id = accumulator.file_id;
                self.current = None;
                self.aborted = Some(file_id);
                return Err(TransferError::TooLarge { file_id, limit });
            }
        }

        accumulator.packet_total = chunk.packet_total;
        accumulator.received += 1;
        accumulator.chunks.push(chunk.data);

        let terminal = chunk.packet_total > 0 && chunk.packet_number == chunk.packet_total;
        if !terminal {
            return Ok(None);
        }

        Ok(self.current.take().map(Accumulator::finish))
    }

    /// File id of the transfer in flight, if any
    pub fn in_flight(&self) -> Option<u32> {
        self.current.as_ref().map(|a| a.file_id)
    }

    /// Drop any transfer in flight
    pub fn clear(&mut self) {
        self.current = None;
        self.aborted = None;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
