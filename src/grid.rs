//! Tile grid geometry
//!
//! Maps a frame's pixel dimensions and a row/column split factor to per-tile
//! pixel rectangles and a stable tile-index numbering. Pure computation, no
//! state.

use thiserror::Error;

/// Bits available in the tile presence mask.
pub const MAX_TILES: u16 = 16;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("frame width {width} is not divisible by {cols} columns")]
    WidthNotDivisible { width: u32, cols: u16 },

    #[error("frame height {height} is not divisible by {rows} rows")]
    HeightNotDivisible { height: u32, rows: u16 },

    #[error("grid must have between 1 and {MAX_TILES} tiles, got {0}")]
    TileCount(u32),

    #[error("tile dimensions {0}x{1} must be even for 4:2:0 chroma")]
    OddTileSize(u32, u32),
}

/// Pixel rectangle of one tile within the full frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Immutable description of the frame split.
///
/// Tile index = `row * cols + col`, in `[0, rows * cols)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSpec {
    frame_width: u32,
    frame_height: u32,
    rows: u16,
    cols: u16,
}

impl GridSpec {
    /// Creates a grid spec, validating the split invariants.
    ///
    /// The frame must divide evenly into the grid, the tile count must fit
    /// the 16-bit presence mask, and tile dimensions must be even so chroma
    /// offsets stay aligned.
    pub fn new(frame_width: u32, frame_height: u32, rows: u16, cols: u16) -> Result<Self, GridError> {
        let tile_count = rows as u32 * cols as u32;
        if tile_count == 0 || tile_count > MAX_TILES as u32 {
            return Err(GridError::TileCount(tile_count));
        }
        if cols == 0 || frame_width % cols as u32 != 0 {
            return Err(GridError::WidthNotDivisible {
                width: frame_width,
                cols,
            });
        }
        if rows == 0 || frame_height % rows as u32 != 0 {
            return Err(GridError::HeightNotDivisible {
                height: frame_height,
                rows,
            });
        }

        let spec = Self {
            frame_width,
            frame_height,
            rows,
            cols,
        };
        if spec.tile_width() % 2 != 0 || spec.tile_height() % 2 != 0 {
            return Err(GridError::OddTileSize(spec.tile_width(), spec.tile_height()));
        }
        Ok(spec)
    }

    pub fn frame_width(&self) -> u32 {
        self.frame_width
    }

    pub fn frame_height(&self) -> u32 {
        self.frame_height
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn tile_count(&self) -> u16 {
        self.rows * self.cols
    }

    pub fn tile_width(&self) -> u32 {
        self.frame_width / self.cols as u32
    }

    pub fn tile_height(&self) -> u32 {
        self.frame_height / self.rows as u32
    }

    /// NV12 byte length of one tile payload (luma + half-height chroma).
    pub fn tile_payload_len(&self) -> usize {
        (self.tile_width() * self.tile_height() * 3 / 2) as usize
    }

    /// NV12 byte length of the full frame.
    pub fn frame_len(&self) -> usize {
        (self.frame_width * self.frame_height * 3 / 2) as usize
    }

    /// Presence mask with every tile index set.
    pub fn full_mask(&self) -> u16 {
        if self.tile_count() == MAX_TILES {
            u16::MAX
        } else {
            (1u16 << self.tile_count()) - 1
        }
    }

    /// Returns the pixel rectangle of `tile_id`.
    ///
    /// An out-of-range id is a programming error; this panics rather than
    /// returning a bogus rectangle.
    pub fn rect_for(&self, tile_id: u16) -> TileRect {
        assert!(
            tile_id < self.tile_count(),
            "tile id {} out of range for {}x{} grid",
            tile_id,
            self.rows,
            self.cols
        );

        let row = (tile_id / self.cols) as u32;
        let col = (tile_id % self.cols) as u32;
        TileRect {
            x: col * self.tile_width(),
            y: row * self.tile_height(),
            width: self.tile_width(),
            height: self.tile_height(),
        }
    }

    /// Checks whether a tile id addresses this grid.
    pub fn contains(&self, tile_id: u16) -> bool {
        tile_id < self.tile_count()
    }
}
