//! Tiled NV12 frame split/transport/reassembly core
//!
//! This library splits a full-resolution NV12 frame into a fixed grid of
//! independently transported tiles and reassembles them on the receiving
//! side, tolerating missing, late, duplicate, and out-of-order tiles:
//! - Self-describing tile descriptors with sequence, mask, and timestamp
//! - Single-buffer "most recent frame wins" reassembly with completion and
//!   staleness flushes
//! - Zero-copy tile payloads via `bytes::Bytes`
//! - Black-fill canvas composition for degraded delivery
//!
//! # Example
//!
//! ```no_run
//! use tilecast::{GridSpec, RotatingSkipPolicy, TileSplitter};
//!
//! let grid = GridSpec::new(1920, 1080, 4, 4).expect("grid");
//! let splitter = TileSplitter::new(grid);
//! let skip = RotatingSkipPolicy::new();
//! // ... capture a frame
//! // let tiles = splitter.split_frame(&crop, &frame, pts, Some(skip.current(16)));
//! ```

pub mod compose;
pub mod config;
pub mod frame;
pub mod grid;
pub mod reassembler;
pub mod tile;

// Re-exports for convenience
pub use compose::{composite, Canvas};
pub use config::{Config, ConfigError, TilingConfig};
pub use frame::{CropCapability, CropError, RawFrame, SoftwareCrop, TileLease, TilePool};
pub use grid::{GridError, GridSpec, TileRect, MAX_TILES};
pub use reassembler::{
    ComposedFrame, FrameSnapshot, Reassembler, ReassemblerConfig, ReassemblerCore,
    ReassemblerStats, TileOutcome,
};
pub use tile::{
    skip_tile, DescriptorError, RotatingSkipPolicy, SplitterStats, TileFrameDescriptor,
    TileSplitter, DESCRIPTOR_HEADER_SIZE,
};
