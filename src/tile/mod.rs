//! Tile splitting: one captured frame into per-tile descriptors
//!
//! The splitter computes the grid rectangles, asks the skip policy which tile
//! to withhold, runs the external crop capability once per retained tile, and
//! packages one [`TileFrameDescriptor`] per retained tile. All tiles of a
//! frame share a sequence number, timestamp, and expected mask.

mod descriptor;
mod skip;

pub use descriptor::{DescriptorError, TileFrameDescriptor, DESCRIPTOR_HEADER_SIZE};
pub use skip::{skip_tile, RotatingSkipPolicy};

use crate::frame::{CropCapability, RawFrame};
use crate::grid::GridSpec;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::warn;

/// Statistics for the tile splitter
#[derive(Debug, Clone, Default)]
pub struct SplitterStats {
    pub frames_split: u64,
    pub tiles_emitted: u64,
    pub tiles_skipped: u64,
    pub crop_failures: u64,
    pub current_seq: u16,
}

/// Splits captured frames into tile descriptors.
///
/// Thread-safe: sequence and statistics are atomics, so multiple capture
/// pipelines may share one splitter.
pub struct TileSplitter {
    grid: GridSpec,

    // Next frame sequence, kept in 16 bits (wraps at 65536)
    frame_seq: AtomicU32,

    // Statistics
    frames_split: AtomicU64,
    tiles_emitted: AtomicU64,
    tiles_skipped: AtomicU64,
    crop_failures: AtomicU64,
}

impl TileSplitter {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            frame_seq: AtomicU32::new(0),
            frames_split: AtomicU64::new(0),
            tiles_emitted: AtomicU64::new(0),
            tiles_skipped: AtomicU64::new(0),
            crop_failures: AtomicU64::new(0),
        }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Expected mask for a frame with `skip` withheld.
    ///
    /// Single-tile omission today; a multi-skip policy only has to replace
    /// this computation.
    pub fn expected_mask(&self, skip: Option<u16>) -> u16 {
        match skip {
            Some(id) if self.grid.contains(id) => self.grid.full_mask() & !(1 << id),
            _ => self.grid.full_mask(),
        }
    }

    /// Splits one captured frame into descriptors for every retained tile.
    ///
    /// Consumes one pool buffer per crop and releases it once the payload has
    /// been copied out. A failed crop drops only that tile for this frame;
    /// the tile stays in the expected mask and the receiver degrades via its
    /// staleness timeout.
    pub fn split_frame<C: CropCapability>(
        &self,
        crop: &C,
        frame: &RawFrame,
        timestamp: u64,
        skip: Option<u16>,
    ) -> Vec<TileFrameDescriptor> {
        let seq = (self.frame_seq.fetch_add(1, Ordering::Relaxed) & 0xFFFF) as u16;
        let expected_mask = self.expected_mask(skip);

        let mut descriptors = Vec::with_capacity(self.grid.tile_count() as usize);

        for tile_id in 0..self.grid.tile_count() {
            if Some(tile_id) == skip {
                self.tiles_skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let rect = self.grid.rect_for(tile_id);
            let lease = match crop.crop(frame, rect) {
                Ok(lease) => lease,
                Err(e) => {
                    warn!(seq = %seq, tile = %tile_id, error = %e, "Crop failed, dropping tile");
                    self.crop_failures.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            // Copy out of the pool buffer; the lease goes back on drop.
            let payload = Bytes::copy_from_slice(&lease);
            drop(lease);

            descriptors.push(TileFrameDescriptor {
                frame_seq: seq,
                tile_id,
                expected_mask,
                timestamp,
                payload,
            });
        }

        self.frames_split.fetch_add(1, Ordering::Relaxed);
        self.tiles_emitted
            .fetch_add(descriptors.len() as u64, Ordering::Relaxed);

        descriptors
    }

    pub fn get_stats(&self) -> SplitterStats {
        SplitterStats {
            frames_split: self.frames_split.load(Ordering::Relaxed),
            tiles_emitted: self.tiles_emitted.load(Ordering::Relaxed),
            tiles_skipped: self.tiles_skipped.load(Ordering::Relaxed),
            crop_failures: self.crop_failures.load(Ordering::Relaxed),
            current_seq: (self.frame_seq.load(Ordering::Relaxed) & 0xFFFF) as u16,
        }
    }
}
