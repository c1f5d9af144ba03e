//! Raw frames, the crop collaborator contract, and the tile buffer pool
//!
//! Capture and hardware crop live outside this crate; `CropCapability` is
//! the seam. `SoftwareCrop` is the bundled CPU reference implementation,
//! drawing its output buffers from a fixed-size `TilePool` so sustained load
//! cannot grow memory unbounded.

use crate::grid::TileRect;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CropError {
    #[error("tile buffer pool exhausted")]
    PoolExhausted,

    #[error("crop rect {x},{y} {width}x{height} exceeds {frame_width}x{frame_height} frame")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("frame buffer too short: {actual} bytes, need {expected}")]
    ShortFrame { expected: usize, actual: usize },
}

/// One full-resolution NV12 source frame: luma plane followed by an
/// interleaved half-height chroma plane.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Allocates a zeroed (black luma, green-free chroma) frame.
    pub fn black(width: u32, height: u32) -> Self {
        let mut data = vec![0u8; (width * height * 3 / 2) as usize];
        // Neutral chroma so the zero frame renders grey-black, not green.
        for b in &mut data[(width * height) as usize..] {
            *b = 128;
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn nv12_len(&self) -> usize {
        (self.width * self.height * 3 / 2) as usize
    }
}

/// External crop collaborator: given a full frame and a rectangle, produce a
/// tile buffer. May fail per invocation without being fatal.
pub trait CropCapability: Send + Sync {
    fn crop(&self, frame: &RawFrame, rect: TileRect) -> Result<TileLease, CropError>;
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    buf_len: usize,
}

/// Fixed-size pool of tile-sized buffers.
///
/// Mirrors the acquire/release discipline of a hardware memory-block pool:
/// every lease must go back before the pool can hand it out again.
#[derive(Clone)]
pub struct TilePool {
    inner: Arc<PoolInner>,
}

impl TilePool {
    /// Creates a pool of `count` buffers of `buf_len` bytes each.
    pub fn new(count: usize, buf_len: usize) -> Self {
        let free = (0..count).map(|_| vec![0u8; buf_len]).collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                buf_len,
            }),
        }
    }

    /// Takes one buffer out of the pool, failing fast when empty.
    pub fn acquire(&self) -> Result<TileLease, CropError> {
        let mut free = self.inner.free.lock().unwrap();
        let buf = free.pop().ok_or(CropError::PoolExhausted)?;
        Ok(TileLease {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Buffers currently available.
    pub fn available(&self) -> usize {
        self.inner.free.lock().unwrap().len()
    }

    pub fn buf_len(&self) -> usize {
        self.inner.buf_len
    }
}

/// A pool buffer on loan. Returns itself to the pool when dropped, on every
/// exit path.
pub struct TileLease {
    buf: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
}

impl TileLease {
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_mut().expect("lease already returned")
    }
}

impl Deref for TileLease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().expect("lease already returned")
    }
}

impl Drop for TileLease {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.free.lock().unwrap().push(buf);
        }
    }
}

/// CPU reference crop: copies the tile's luma rows and half-height chroma
/// rows out of the source frame into a pool buffer.
pub struct SoftwareCrop {
    pool: TilePool,
}

impl SoftwareCrop {
    pub fn new(pool: TilePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &TilePool {
        &self.pool
    }
}

impl CropCapability for SoftwareCrop {
    fn crop(&self, frame: &RawFrame, rect: TileRect) -> Result<TileLease, CropError> {
        if rect.x + rect.width > frame.width || rect.y + rect.height > frame.height {
            return Err(CropError::OutOfBounds {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                frame_width: frame.width,
                frame_height: frame.height,
            });
        }
        if frame.data.len() < frame.nv12_len() {
            return Err(CropError::ShortFrame {
                expected: frame.nv12_len(),
                actual: frame.data.len(),
            });
        }

        let mut lease = self.pool.acquire()?;

        let stride = frame.width as usize;
        let (x, y) = (rect.x as usize, rect.y as usize);
        let (tw, th) = (rect.width as usize, rect.height as usize);
        let luma_plane = (frame.width * frame.height) as usize;

        {
            let dst = lease.as_mut_slice();

            // Luma rows
            for row in 0..th {
                let src_off = (y + row) * stride + x;
                dst[row * tw..(row + 1) * tw]
                    .copy_from_slice(&frame.data[src_off..src_off + tw]);
            }

            // Chroma rows, half height, half vertical offset
            let dst_uv = th * tw;
            let uv_y = y / 2;
            for row in 0..th / 2 {
                let src_off = luma_plane + (uv_y + row) * stride + x;
                dst[dst_uv + row * tw..dst_uv + (row + 1) * tw]
                    .copy_from_slice(&frame.data[src_off..src_off + tw]);
            }
        }

        Ok(lease)
    }
}
