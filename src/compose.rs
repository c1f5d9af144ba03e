//! Canvas composition: blitting received tiles back into a full frame
//!
//! The canvas is zero-initialized, so tiles that never arrived render as
//! black regions — the intended degraded-mode contract, not an error.

use crate::grid::GridSpec;
use crate::reassembler::FrameSnapshot;

/// Full-resolution NV12 canvas: luma plane followed by an interleaved
/// half-height chroma plane.
#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Canvas {
    /// Allocates a zeroed canvas for the grid's frame size.
    pub fn new(grid: &GridSpec) -> Self {
        Self {
            width: grid.frame_width(),
            height: grid.frame_height(),
            data: vec![0u8; grid.frame_len()],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Luma plane, `width * height` bytes.
    pub fn luma(&self) -> &[u8] {
        &self.data[..(self.width * self.height) as usize]
    }

    /// Chroma plane, `width * height / 2` bytes.
    pub fn chroma(&self) -> &[u8] {
        &self.data[(self.width * self.height) as usize..]
    }

    /// Luma sample at pixel (x, y).
    pub fn luma_at(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }
}

/// Composes a flushed snapshot into a full canvas.
///
/// Every tile present in the snapshot (expected bit set, payload stored) is
/// blitted at its grid offset; everything else stays at the zero fill.
pub fn composite(snapshot: &FrameSnapshot, grid: &GridSpec) -> Canvas {
    let mut canvas = Canvas::new(grid);

    for tile_id in 0..grid.tile_count() {
        if snapshot.expected_mask & (1 << tile_id) == 0 {
            continue;
        }
        if let Some(payload) = &snapshot.tiles[tile_id as usize] {
            blit_tile(&mut canvas, grid, tile_id, payload);
        }
    }

    canvas
}

/// Copies one tile's luma and chroma rows into the canvas at the tile's
/// offset. Chroma rows land at half the vertical offset (4:2:0).
fn blit_tile(canvas: &mut Canvas, grid: &GridSpec, tile_id: u16, payload: &[u8]) {
    if payload.len() < grid.tile_payload_len() {
        return;
    }

    let rect = grid.rect_for(tile_id);
    let stride = canvas.width as usize;
    let (x, y) = (rect.x as usize, rect.y as usize);
    let (tw, th) = (rect.width as usize, rect.height as usize);
    let luma_plane = stride * canvas.height as usize;

    // Luma rows
    for row in 0..th {
        let dst_off = (y + row) * stride + x;
        canvas.data[dst_off..dst_off + tw].copy_from_slice(&payload[row * tw..(row + 1) * tw]);
    }

    // Chroma rows
    let src_uv = tw * th;
    let uv_y = y / 2;
    for row in 0..th / 2 {
        let dst_off = luma_plane + (uv_y + row) * stride + x;
        canvas.data[dst_off..dst_off + tw]
            .copy_from_slice(&payload[src_uv + row * tw..src_uv + (row + 1) * tw]);
    }
}
