//! The single in-flight reassembly buffer and its flush snapshot

use bytes::Bytes;
use std::time::Instant;

/// Mutable accumulation state for one `frame_seq`.
///
/// Owned exclusively by the reassembler core; the compositor only ever sees
/// a [`FrameSnapshot`] extracted under the lock.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    pub seq: u16,
    pub expected_mask: u16,
    pub received_mask: u16,
    pub timestamp: u64,
    pub dirty: bool,
    pub last_update: Instant,
    pub tiles: Vec<Option<Bytes>>,
}

impl ReassemblyBuffer {
    pub fn new(seq: u16, expected_mask: u16, timestamp: u64, tile_count: u16, now: Instant) -> Self {
        Self {
            seq,
            expected_mask,
            received_mask: 0,
            timestamp,
            dirty: false,
            last_update: now,
            tiles: vec![None; tile_count as usize],
        }
    }

    /// Stores a tile payload, last write wins.
    pub fn insert(&mut self, tile_id: u16, payload: Bytes, now: Instant) {
        self.tiles[tile_id as usize] = Some(payload);
        self.received_mask |= 1 << tile_id;
        self.dirty = true;
        self.last_update = now;
    }

    /// All expected tiles present.
    pub fn is_complete(&self) -> bool {
        self.received_mask & self.expected_mask == self.expected_mask
    }

    pub fn tile_count_received(&self) -> u32 {
        self.received_mask.count_ones()
    }

    /// Read-only snapshot for composition. Tile payloads are `Bytes` clones
    /// (refcount bumps, no pixel copy), so the buffer stays live for
    /// duplicates arriving after a completion flush.
    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            seq: self.seq,
            expected_mask: self.expected_mask,
            received_mask: self.received_mask,
            timestamp: self.timestamp,
            tiles: self.tiles.clone(),
        }
    }

    /// Consumes the buffer into a snapshot without cloning, for supersession
    /// where the buffer is being retired anyway.
    pub fn into_snapshot(self) -> FrameSnapshot {
        FrameSnapshot {
            seq: self.seq,
            expected_mask: self.expected_mask,
            received_mask: self.received_mask,
            timestamp: self.timestamp,
            tiles: self.tiles,
        }
    }
}

/// Immutable view of a flushed frame handed to the compositor.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub seq: u16,
    pub expected_mask: u16,
    pub received_mask: u16,
    pub timestamp: u64,
    pub tiles: Vec<Option<Bytes>>,
}

impl FrameSnapshot {
    pub fn is_complete(&self) -> bool {
        self.received_mask & self.expected_mask == self.expected_mask
    }
}
