//! Rotating skip policy
//!
//! Withholds one tile per one-second window, cycling through every index.
//! Models a degraded/partial-delivery scenario the reassembler must tolerate.

use std::time::Instant;

/// Returns the tile index withheld during the current second.
pub fn skip_tile(elapsed_ms: u64, total_tiles: u16) -> u16 {
    ((elapsed_ms / 1000) % total_tiles as u64) as u16
}

/// Skip policy anchored to a fixed start instant.
#[derive(Clone)]
pub struct RotatingSkipPolicy {
    start: Instant,
}

impl RotatingSkipPolicy {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Tile index to withhold right now.
    pub fn current(&self, total_tiles: u16) -> u16 {
        skip_tile(self.start.elapsed().as_millis() as u64, total_tiles)
    }
}

impl Default for RotatingSkipPolicy {
    fn default() -> Self {
        Self::new()
    }
}
