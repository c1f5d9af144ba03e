//! Reassembly statistics

use serde::{Deserialize, Serialize};

/// Counters kept by the reassembler core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReassemblerStats {
    /// Tiles accepted into a buffer
    pub tiles_received: u64,

    /// Malformed or inconsistent descriptors rejected at the boundary
    pub tiles_rejected: u64,

    /// Stragglers for an already retired frame, silently dropped
    pub tiles_stale: u64,

    /// Frames flushed with every expected tile present
    pub frames_complete: u64,

    /// Frames flushed on the staleness timeout with tiles missing
    pub frames_partial: u64,

    /// Incomplete frames flushed because a newer frame displaced them
    pub frames_superseded: u64,

    /// Composed frames dropped because the downstream channel was full
    pub frames_dropped: u64,
}

impl ReassemblerStats {
    /// Total flushes, however triggered.
    pub fn frames_flushed(&self) -> u64 {
        self.frames_complete + self.frames_partial + self.frames_superseded
    }

    /// Fraction of flushed frames that were complete.
    pub fn completion_rate(&self) -> f64 {
        let total = self.frames_flushed();
        if total == 0 {
            return 0.0;
        }
        self.frames_complete as f64 / total as f64
    }
}
