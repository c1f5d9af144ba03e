//! Tile frame descriptor — the wire unit exchanged between split and merge
//!
//! Wire layout (big-endian):
//! ```text
//!  0               2               4               6
//! +-------+-------+-------+-------+-------+-------+
//! |   frame_seq   |    tile_id    | expected_mask |
//! +-------+-------+-------+-------+-------+-------+
//! |                   timestamp (u64)             |
//! +------------------------------------------------+
//! |              NV12 tile payload ...             |
//! +------------------------------------------------+
//! ```

use crate::grid::GridSpec;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Fixed header size preceding the payload.
pub const DESCRIPTOR_HEADER_SIZE: usize = 14;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("tile id {tile_id} out of range for {tile_count}-tile grid")]
    TileIdOutOfRange { tile_id: u16, tile_count: u16 },

    #[error("payload length {actual} does not match tile size {expected}")]
    PayloadLength { expected: usize, actual: usize },

    #[error("tile id {tile_id} not present in own expected mask {mask:#06x}")]
    TileNotInMask { tile_id: u16, mask: u16 },

    #[error("expected mask {got:#06x} disagrees with frame's mask {have:#06x}")]
    MaskMismatch { have: u16, got: u16 },

    #[error("timestamp {got} disagrees with frame's timestamp {have}")]
    TimestampMismatch { have: u64, got: u64 },

    #[error("truncated descriptor: {0} bytes")]
    Truncated(usize),
}

/// One tile instance in flight.
///
/// All descriptors sharing a `frame_seq` carry the same `expected_mask` and
/// `timestamp`; the payload is the tile's raw NV12 pixels.
#[derive(Debug, Clone)]
pub struct TileFrameDescriptor {
    /// Source frame counter, wraps at 65536.
    pub frame_seq: u16,

    /// Index into the grid, `row * cols + col`.
    pub tile_id: u16,

    /// One bit per tile index the sender intends to transmit for this frame.
    pub expected_mask: u16,

    /// Capture-time presentation timestamp, shared by all tiles of a frame.
    pub timestamp: u64,

    /// Raw NV12 pixel data for exactly one tile region.
    pub payload: Bytes,
}

impl TileFrameDescriptor {
    /// Validates the descriptor against a grid.
    ///
    /// Checks tile id range, payload length, and that the descriptor's own
    /// tile bit is set in its mask.
    pub fn validate(&self, grid: &GridSpec) -> Result<(), DescriptorError> {
        if !grid.contains(self.tile_id) {
            return Err(DescriptorError::TileIdOutOfRange {
                tile_id: self.tile_id,
                tile_count: grid.tile_count(),
            });
        }
        if self.payload.len() != grid.tile_payload_len() {
            return Err(DescriptorError::PayloadLength {
                expected: grid.tile_payload_len(),
                actual: self.payload.len(),
            });
        }
        if self.expected_mask & (1 << self.tile_id) == 0 {
            return Err(DescriptorError::TileNotInMask {
                tile_id: self.tile_id,
                mask: self.expected_mask,
            });
        }
        Ok(())
    }

    /// Serializes header + payload for transport.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DESCRIPTOR_HEADER_SIZE + self.payload.len());
        buf.put_u16(self.frame_seq);
        buf.put_u16(self.tile_id);
        buf.put_u16(self.expected_mask);
        buf.put_u64(self.timestamp);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parses a descriptor from transport bytes.
    ///
    /// The payload is a zero-copy slice of the input.
    pub fn from_bytes(data: Bytes) -> Result<Self, DescriptorError> {
        if data.len() < DESCRIPTOR_HEADER_SIZE {
            return Err(DescriptorError::Truncated(data.len()));
        }

        let frame_seq = u16::from_be_bytes([data[0], data[1]]);
        let tile_id = u16::from_be_bytes([data[2], data[3]]);
        let expected_mask = u16::from_be_bytes([data[4], data[5]]);
        let timestamp = u64::from_be_bytes([
            data[6], data[7], data[8], data[9], data[10], data[11], data[12], data[13],
        ]);

        Ok(Self {
            frame_seq,
            tile_id,
            expected_mask,
            timestamp,
            payload: data.slice(DESCRIPTOR_HEADER_SIZE..),
        })
    }
}
