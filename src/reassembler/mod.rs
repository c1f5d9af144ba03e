//! Frame reassembly: unordered, lossy tile stream back into full frames
//!
//! Exactly one buffer is ever active — the most recent frame wins. A
//! descriptor for a new sequence flushes whatever the current buffer holds
//! (even incomplete) before the buffer is reset; a background flush task
//! finishes frames on completion or on a staleness timeout.
//!
//! [`ReassemblerCore`] is the synchronous state machine: hosts that drive
//! their own clock call `on_tile` / `tick(now)` directly. [`Reassembler`]
//! wraps it in the shared-buffer concurrency contract: ingestion and the
//! flush/compose path share only the core mutex, composition and channel
//! sends happen outside it.

mod buffer;
mod stats;

pub use buffer::{FrameSnapshot, ReassemblyBuffer};
pub use stats::ReassemblerStats;

use crate::compose::{composite, Canvas};
use crate::grid::GridSpec;
use crate::tile::{DescriptorError, TileFrameDescriptor};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace};

/// Default staleness timeout before an incomplete dirty buffer is flushed.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(30);

/// Default poll interval of the background flush task.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(30);

/// Capacity of the composed-frame channel.
const COMPOSED_CHANNEL_CAPACITY: usize = 4;

/// Reassembler configuration
#[derive(Debug, Clone)]
pub struct ReassemblerConfig {
    pub grid: GridSpec,

    /// Staleness timeout: a dirty buffer with no new tiles for this long is
    /// flushed incomplete.
    pub flush_interval: Duration,

    /// How often the flush task re-evaluates when no wake arrives.
    pub poll_interval: Duration,
}

impl ReassemblerConfig {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            grid,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// One reassembled frame leaving the core.
#[derive(Debug)]
pub struct ComposedFrame {
    pub canvas: Canvas,
    pub timestamp: u64,
    pub seq: u16,
    pub expected_mask: u16,
    pub received_mask: u16,
}

/// What a tile insertion did to the state machine.
#[derive(Debug)]
pub enum TileOutcome {
    /// Tile stored in the active buffer.
    Accepted,

    /// Tile stored; the previous frame's partial state must be flushed.
    Superseded(FrameSnapshot),

    /// Straggler for an already retired frame, dropped.
    Stale,
}

/// Synchronous single-buffer reassembly state machine.
///
/// Not thread-safe by itself; [`Reassembler`] provides the locked, async
/// rendition.
pub struct ReassemblerCore {
    grid: GridSpec,
    flush_interval: Duration,
    buffer: Option<ReassemblyBuffer>,

    // Seq most recently retired by flush or supersession. Stragglers for it
    // are dropped; comparing for equality only keeps wraparound trivial.
    retired_seq: Option<u16>,

    stats: ReassemblerStats,
}

impl ReassemblerCore {
    pub fn new(config: &ReassemblerConfig) -> Self {
        Self {
            grid: config.grid,
            flush_interval: config.flush_interval,
            buffer: None,
            retired_seq: None,
            stats: ReassemblerStats::default(),
        }
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn stats(&self) -> &ReassemblerStats {
        &self.stats
    }

    /// Ingests one descriptor.
    ///
    /// Malformed descriptors are rejected without touching the buffer. A
    /// descriptor for a new sequence retires the current buffer first: if it
    /// is dirty and holds at least one tile, its snapshot comes back as
    /// [`TileOutcome::Superseded`] and must be composed by the caller.
    pub fn on_tile(
        &mut self,
        descriptor: &TileFrameDescriptor,
        now: Instant,
    ) -> Result<TileOutcome, DescriptorError> {
        if let Err(e) = descriptor.validate(&self.grid) {
            self.stats.tiles_rejected += 1;
            return Err(e);
        }

        if self.retired_seq == Some(descriptor.frame_seq)
            && self
                .buffer
                .as_ref()
                .map_or(true, |b| b.seq != descriptor.frame_seq)
        {
            self.stats.tiles_stale += 1;
            return Ok(TileOutcome::Stale);
        }

        let mut flushed = None;

        let needs_reset = match &self.buffer {
            Some(buf) => buf.seq != descriptor.frame_seq,
            None => true,
        };

        if needs_reset {
            if let Some(old) = self.buffer.take() {
                self.retired_seq = Some(old.seq);
                // Never block progress on a late frame: flush what arrived.
                if old.dirty && old.received_mask != 0 {
                    self.stats.frames_superseded += 1;
                    flushed = Some(old.into_snapshot());
                }
            }
            self.buffer = Some(ReassemblyBuffer::new(
                descriptor.frame_seq,
                descriptor.expected_mask,
                descriptor.timestamp,
                self.grid.tile_count(),
                now,
            ));
        }

        let buf = self.buffer.as_mut().expect("buffer initialized above");

        // Descriptors of one frame must agree on mask and timestamp.
        if descriptor.expected_mask != buf.expected_mask {
            self.stats.tiles_rejected += 1;
            return Err(DescriptorError::MaskMismatch {
                have: buf.expected_mask,
                got: descriptor.expected_mask,
            });
        }
        if descriptor.timestamp != buf.timestamp {
            self.stats.tiles_rejected += 1;
            return Err(DescriptorError::TimestampMismatch {
                have: buf.timestamp,
                got: descriptor.timestamp,
            });
        }

        buf.insert(descriptor.tile_id, descriptor.payload.clone(), now);
        self.stats.tiles_received += 1;

        Ok(match flushed {
            Some(snapshot) => TileOutcome::Superseded(snapshot),
            None => TileOutcome::Accepted,
        })
    }

    /// Evaluates the flush conditions against `now`.
    ///
    /// Flushes when every expected tile is present, or when the buffer is
    /// dirty and stale. The buffer stays active with `dirty` cleared, so a
    /// late duplicate can still trigger a refreshed flush of the same frame.
    pub fn tick(&mut self, now: Instant) -> Option<FrameSnapshot> {
        let buf = self.buffer.as_mut()?;

        if !buf.dirty || buf.expected_mask == 0 {
            return None;
        }

        let complete = buf.is_complete();
        let stale = now.duration_since(buf.last_update) >= self.flush_interval;
        if !complete && !stale {
            return None;
        }

        buf.dirty = false;
        self.retired_seq = Some(buf.seq);
        if complete {
            self.stats.frames_complete += 1;
        } else {
            self.stats.frames_partial += 1;
        }

        Some(buf.snapshot())
    }
}

/// Async reassembler: locked core, wake-on-dirty flush task, composed frames
/// out through a bounded channel.
pub struct Reassembler {
    core: Arc<Mutex<ReassemblerCore>>,
    grid: GridSpec,
    poll_interval: Duration,

    notify: Arc<Notify>,
    is_running: Arc<AtomicBool>,

    composed_tx: mpsc::Sender<ComposedFrame>,
    frames_dropped: Arc<AtomicU64>,
}

impl Reassembler {
    /// Creates the reassembler and the receiving end of the composed-frame
    /// channel.
    pub fn new(config: ReassemblerConfig) -> (Self, mpsc::Receiver<ComposedFrame>) {
        let (composed_tx, composed_rx) = mpsc::channel(COMPOSED_CHANNEL_CAPACITY);

        let reassembler = Self {
            core: Arc::new(Mutex::new(ReassemblerCore::new(&config))),
            grid: config.grid,
            poll_interval: config.poll_interval,
            notify: Arc::new(Notify::new()),
            is_running: Arc::new(AtomicBool::new(false)),
            composed_tx,
            frames_dropped: Arc::new(AtomicU64::new(0)),
        };

        (reassembler, composed_rx)
    }

    /// Spawns the background flush task.
    pub fn start(&self) {
        if self.is_running.swap(true, Ordering::Relaxed) {
            return;
        }

        info!(
            tiles = %self.grid.tile_count(),
            poll_ms = %self.poll_interval.as_millis(),
            "Starting reassembler flush task"
        );

        let task = FlushTask {
            core: Arc::clone(&self.core),
            grid: self.grid,
            poll_interval: self.poll_interval,
            notify: Arc::clone(&self.notify),
            is_running: Arc::clone(&self.is_running),
            composed_tx: self.composed_tx.clone(),
            frames_dropped: Arc::clone(&self.frames_dropped),
        };

        tokio::spawn(task.run());
    }

    /// Ingests one received descriptor.
    ///
    /// Cheap under the lock: mask update and payload refcount. If the tile
    /// displaces an incomplete frame, that frame is composed here, outside
    /// the lock, before this call returns.
    pub fn on_tile(&self, descriptor: &TileFrameDescriptor) {
        let outcome = {
            let mut core = self.core.lock().unwrap();
            core.on_tile(descriptor, Instant::now())
        };

        match outcome {
            Ok(TileOutcome::Accepted) => self.notify.notify_one(),
            Ok(TileOutcome::Superseded(snapshot)) => {
                debug!(
                    seq = %snapshot.seq,
                    received = %format!("{:#06x}", snapshot.received_mask),
                    expected = %format!("{:#06x}", snapshot.expected_mask),
                    "Frame superseded, flushing partial state"
                );
                self.dispatch(snapshot);
                self.notify.notify_one();
            }
            Ok(TileOutcome::Stale) => {
                trace!(seq = %descriptor.frame_seq, tile = %descriptor.tile_id, "Stale tile dropped");
            }
            Err(e) => {
                debug!(
                    seq = %descriptor.frame_seq,
                    tile = %descriptor.tile_id,
                    error = %e,
                    "Rejected tile descriptor"
                );
            }
        }
    }

    /// Composes a snapshot and hands it downstream without blocking.
    fn dispatch(&self, snapshot: FrameSnapshot) {
        dispatch_snapshot(
            snapshot,
            &self.grid,
            &self.composed_tx,
            &self.frames_dropped,
        );
    }

    /// Signals the flush task to stop at its next wake.
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Relaxed);
        self.notify.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Current statistics, including composed frames dropped on the channel.
    pub fn stats(&self) -> ReassemblerStats {
        let mut stats = self.core.lock().unwrap().stats().clone();
        stats.frames_dropped = self.frames_dropped.load(Ordering::Relaxed);
        stats
    }
}

impl Drop for Reassembler {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
        self.notify.notify_one();
    }
}

fn dispatch_snapshot(
    snapshot: FrameSnapshot,
    grid: &GridSpec,
    composed_tx: &mpsc::Sender<ComposedFrame>,
    frames_dropped: &AtomicU64,
) {
    let canvas = composite(&snapshot, grid);
    let frame = ComposedFrame {
        canvas,
        timestamp: snapshot.timestamp,
        seq: snapshot.seq,
        expected_mask: snapshot.expected_mask,
        received_mask: snapshot.received_mask,
    };

    // Slow downstream encode must never stall the flush path.
    if composed_tx.try_send(frame).is_err() {
        frames_dropped.fetch_add(1, Ordering::Relaxed);
        debug!(seq = %snapshot.seq, "Composed frame dropped, downstream full");
    }
}

/// Background task evaluating the flush conditions.
///
/// Blocks on the dirty-wake notification with the poll interval as timeout,
/// never busy-polls. Checks the stop flag on every wake.
struct FlushTask {
    core: Arc<Mutex<ReassemblerCore>>,
    grid: GridSpec,
    poll_interval: Duration,
    notify: Arc<Notify>,
    is_running: Arc<AtomicBool>,
    composed_tx: mpsc::Sender<ComposedFrame>,
    frames_dropped: Arc<AtomicU64>,
}

impl FlushTask {
    async fn run(self) {
        debug!("Reassembler flush task started");

        loop {
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if !self.is_running.load(Ordering::Relaxed) {
                break;
            }

            let snapshot = {
                let mut core = self.core.lock().unwrap();
                core.tick(Instant::now())
            };

            if let Some(snapshot) = snapshot {
                trace!(
                    seq = %snapshot.seq,
                    complete = %snapshot.is_complete(),
                    "Flushing frame"
                );
                dispatch_snapshot(snapshot, &self.grid, &self.composed_tx, &self.frames_dropped);
            }
        }

        debug!("Reassembler flush task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn test_grid() -> GridSpec {
        GridSpec::new(64, 32, 2, 2).unwrap()
    }

    fn descriptor(grid: &GridSpec, seq: u16, tile_id: u16, mask: u16, ts: u64) -> TileFrameDescriptor {
        TileFrameDescriptor {
            frame_seq: seq,
            tile_id,
            expected_mask: mask,
            timestamp: ts,
            payload: Bytes::from(vec![tile_id as u8 + 1; grid.tile_payload_len()]),
        }
    }

    #[test]
    fn test_complete_frame_flushes_on_tick() {
        let grid = test_grid();
        let mut core = ReassemblerCore::new(&ReassemblerConfig::new(grid));
        let now = Instant::now();

        for tile_id in 0..4 {
            let d = descriptor(&grid, 7, tile_id, 0b1111, 100);
            assert!(matches!(core.on_tile(&d, now), Ok(TileOutcome::Accepted)));
        }

        // Complete: flushes immediately, no staleness needed
        let snap = core.tick(now).expect("complete frame must flush");
        assert_eq!(snap.seq, 7);
        assert_eq!(snap.received_mask, 0b1111);
        assert!(snap.is_complete());
        assert_eq!(core.stats().frames_complete, 1);

        // Clean after flush: nothing more to do
        assert!(core.tick(now).is_none());
    }

    #[test]
    fn test_incomplete_frame_waits_for_staleness() {
        let grid = test_grid();
        let mut core = ReassemblerCore::new(&ReassemblerConfig::new(grid));
        let now = Instant::now();

        let d = descriptor(&grid, 1, 0, 0b1111, 100);
        core.on_tile(&d, now).unwrap();

        assert!(core.tick(now).is_none());
        assert!(core.tick(now + Duration::from_millis(10)).is_none());

        let snap = core
            .tick(now + Duration::from_millis(30))
            .expect("stale frame must flush");
        assert!(!snap.is_complete());
        assert_eq!(core.stats().frames_partial, 1);
    }

    #[test]
    fn test_duplicate_insert_idempotent() {
        let grid = test_grid();
        let mut core = ReassemblerCore::new(&ReassemblerConfig::new(grid));
        let now = Instant::now();

        let d = descriptor(&grid, 1, 2, 0b1111, 100);
        core.on_tile(&d, now).unwrap();
        let mask_once = core.buffer.as_ref().unwrap().received_mask;
        let count_once = core.buffer.as_ref().unwrap().tile_count_received();

        core.on_tile(&d, now).unwrap();
        let buf = core.buffer.as_ref().unwrap();
        assert_eq!(buf.received_mask, mask_once);
        assert_eq!(buf.tile_count_received(), count_once);
    }

    #[test]
    fn test_supersession_flushes_partial_state() {
        let grid = test_grid();
        let mut core = ReassemblerCore::new(&ReassemblerConfig::new(grid));
        let now = Instant::now();

        core.on_tile(&descriptor(&grid, 1, 0, 0b1111, 100), now).unwrap();
        core.on_tile(&descriptor(&grid, 1, 1, 0b1111, 100), now).unwrap();

        let outcome = core.on_tile(&descriptor(&grid, 2, 0, 0b1111, 140), now).unwrap();
        match outcome {
            TileOutcome::Superseded(snap) => {
                assert_eq!(snap.seq, 1);
                assert_eq!(snap.received_mask, 0b0011);
            }
            other => panic!("expected supersession, got {:?}", other),
        }
        assert_eq!(core.stats().frames_superseded, 1);
        assert_eq!(core.buffer.as_ref().unwrap().seq, 2);
    }

    #[test]
    fn test_straggler_for_retired_seq_dropped() {
        let grid = test_grid();
        let mut core = ReassemblerCore::new(&ReassemblerConfig::new(grid));
        let now = Instant::now();

        core.on_tile(&descriptor(&grid, 1, 0, 0b1111, 100), now).unwrap();
        core.on_tile(&descriptor(&grid, 2, 0, 0b1111, 140), now).unwrap();

        // Tile of frame 1 straggling in after frame 2 displaced it
        let outcome = core.on_tile(&descriptor(&grid, 1, 3, 0b1111, 100), now).unwrap();
        assert!(matches!(outcome, TileOutcome::Stale));
        assert_eq!(core.buffer.as_ref().unwrap().seq, 2);
        assert_eq!(core.stats().tiles_stale, 1);
    }

    #[test]
    fn test_rejected_tile_does_not_mutate_buffer() {
        let grid = test_grid();
        let mut core = ReassemblerCore::new(&ReassemblerConfig::new(grid));
        let now = Instant::now();

        core.on_tile(&descriptor(&grid, 1, 0, 0b1111, 100), now).unwrap();

        // Out-of-range tile id
        let bad = descriptor(&grid, 1, 4, 0b1111, 100);
        assert!(core.on_tile(&bad, now).is_err());
        assert_eq!(core.buffer.as_ref().unwrap().received_mask, 0b0001);
        assert_eq!(core.stats().tiles_rejected, 1);
    }

    #[test]
    fn test_mask_mismatch_rejected() {
        let grid = test_grid();
        let mut core = ReassemblerCore::new(&ReassemblerConfig::new(grid));
        let now = Instant::now();

        core.on_tile(&descriptor(&grid, 1, 0, 0b1111, 100), now).unwrap();

        let inconsistent = descriptor(&grid, 1, 1, 0b0011, 100);
        assert!(matches!(
            core.on_tile(&inconsistent, now),
            Err(DescriptorError::MaskMismatch { .. })
        ));
        assert_eq!(core.buffer.as_ref().unwrap().received_mask, 0b0001);
    }

    #[test]
    fn test_seq_wraparound_is_plain_supersession() {
        let grid = test_grid();
        let mut core = ReassemblerCore::new(&ReassemblerConfig::new(grid));
        let now = Instant::now();

        core.on_tile(&descriptor(&grid, 65535, 0, 0b1111, 100), now).unwrap();
        let outcome = core.on_tile(&descriptor(&grid, 0, 0, 0b1111, 140), now).unwrap();
        assert!(matches!(outcome, TileOutcome::Superseded(_)));
        assert_eq!(core.buffer.as_ref().unwrap().seq, 0);
    }

    #[tokio::test]
    async fn test_async_flush_delivers_composed_frame() {
        let grid = test_grid();
        let mut config = ReassemblerConfig::new(grid);
        config.flush_interval = Duration::from_millis(10);
        config.poll_interval = Duration::from_millis(5);

        let (reassembler, mut composed_rx) = Reassembler::new(config);
        reassembler.start();

        for tile_id in 0..4 {
            reassembler.on_tile(&descriptor(&grid, 1, tile_id, 0b1111, 42));
        }

        let frame = tokio::time::timeout(Duration::from_millis(500), composed_rx.recv())
            .await
            .expect("flush within timeout")
            .expect("channel open");

        assert_eq!(frame.seq, 1);
        assert_eq!(frame.timestamp, 42);
        assert_eq!(frame.received_mask, 0b1111);
        // Tile 0 payload fill value 1 lands at the origin
        assert_eq!(frame.canvas.luma_at(0, 0), 1);

        reassembler.stop();
        assert!(!reassembler.is_running());
    }
}
