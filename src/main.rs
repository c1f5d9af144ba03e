//! Tiled streaming demo CLI
//!
//! Wires the full split/transport/reassemble loop with a synthetic NV12
//! source standing in for the camera and an in-process channel standing in
//! for the network: tiles are serialized to wire bytes on one side and
//! parsed back on the other. Composed frames are counted and logged; the
//! hardware encoder and RTSP session they would feed are external
//! collaborators.

// Use jemalloc for better memory management (optional feature)
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tilecast::config::Config;
use tilecast::{
    RawFrame, Reassembler, RotatingSkipPolicy, SoftwareCrop, TileFrameDescriptor, TilePool,
    TileSplitter,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// In-flight descriptor capacity of the stand-in transport.
const TRANSPORT_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "tilecast")]
#[command(about = "Tiled NV12 split/reassembly streaming demo")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("tilecast starting");

    let config = if Path::new(&cli.config).exists() {
        info!(config_path = %cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!(config_path = %cli.config, "Config file not found, using defaults");
        Config::default()
    };

    let grid = config.grid()?;
    info!(
        resolution = %format!("{}x{}", grid.frame_width(), grid.frame_height()),
        grid = %format!("{}x{}", grid.rows(), grid.cols()),
        tile = %format!("{}x{}", grid.tile_width(), grid.tile_height()),
        fps = %config.tiling.fps,
        "Configuration loaded"
    );

    // Receiver side: reassembler plus its flush task
    let (reassembler, mut composed_rx) = Reassembler::new(config.reassembler()?);
    let reassembler = Arc::new(reassembler);
    reassembler.start();

    // Stand-in transport carrying descriptor wire bytes
    let (tile_tx, mut tile_rx) = mpsc::channel::<Bytes>(TRANSPORT_CAPACITY);

    // Sender side: synthetic capture -> splitter -> transport
    let splitter = Arc::new(TileSplitter::new(grid));
    let sender = {
        let splitter = Arc::clone(&splitter);
        let fps = config.tiling.fps;
        let pool_size = config.tiling.tile_pool_size;
        tokio::spawn(async move {
            let pool = TilePool::new(pool_size, grid.tile_payload_len());
            let crop = SoftwareCrop::new(pool);
            let skip = RotatingSkipPolicy::new();
            let frame_interval = Duration::from_millis(1000 / fps.max(1) as u64);
            let mut ticker = tokio::time::interval(frame_interval);
            let mut frame_index = 0u64;

            loop {
                ticker.tick().await;

                let frame = test_pattern_frame(grid.frame_width(), grid.frame_height(), frame_index);
                let timestamp = frame_index * 1000 / fps as u64;
                let skip_tile = skip.current(grid.tile_count());

                let descriptors =
                    splitter.split_frame(&crop, &frame, timestamp, Some(skip_tile));

                for d in descriptors {
                    // Best-effort transport: drop when the link is saturated
                    if tile_tx.try_send(d.to_bytes()).is_err() {
                        debug!(seq = %d.frame_seq, tile = %d.tile_id, "Transport full, tile dropped");
                    }
                }

                frame_index += 1;
            }
        })
    };

    // Receiver ingestion: transport -> descriptor -> reassembler
    let ingest = {
        let reassembler = Arc::clone(&reassembler);
        tokio::spawn(async move {
            while let Some(wire) = tile_rx.recv().await {
                match TileFrameDescriptor::from_bytes(wire) {
                    Ok(descriptor) => reassembler.on_tile(&descriptor),
                    Err(e) => warn!(error = %e, "Discarding undecodable tile"),
                }
            }
        })
    };

    // Downstream consumer: where a hardware encoder + RTSP session would sit
    let stats_interval = config.tiling.stats_interval_seconds.max(1);
    let consumer = {
        let reassembler = Arc::clone(&reassembler);
        let splitter = Arc::clone(&splitter);
        tokio::spawn(async move {
            let mut composed = 0u64;
            let mut last_report = tokio::time::Instant::now();

            while let Some(frame) = composed_rx.recv().await {
                composed += 1;
                debug!(
                    seq = %frame.seq,
                    ts = %frame.timestamp,
                    received = %format!("{:#06x}", frame.received_mask),
                    expected = %format!("{:#06x}", frame.expected_mask),
                    "Composed frame"
                );

                if last_report.elapsed() >= Duration::from_secs(stats_interval) {
                    let r = reassembler.stats();
                    let s = splitter.get_stats();
                    info!(
                        composed = %composed,
                        complete = %r.frames_complete,
                        partial = %r.frames_partial,
                        superseded = %r.frames_superseded,
                        rejected = %r.tiles_rejected,
                        tiles_sent = %s.tiles_emitted,
                        crop_failures = %s.crop_failures,
                        "Stats"
                    );
                    last_report = tokio::time::Instant::now();
                }
            }
        })
    };

    info!("Pipeline running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    reassembler.stop();
    sender.abort();
    ingest.abort();
    consumer.abort();

    let r = reassembler.stats();
    info!(
        flushed = %r.frames_flushed(),
        complete = %r.frames_complete,
        partial = %r.frames_partial,
        superseded = %r.frames_superseded,
        completion_rate = %format!("{:.2}", r.completion_rate()),
        "Final stats"
    );

    Ok(())
}

/// Synthetic NV12 frame: a diagonal luma gradient that drifts with the frame
/// index, neutral chroma.
fn test_pattern_frame(width: u32, height: u32, index: u64) -> RawFrame {
    let mut frame = RawFrame::black(width, height);
    let shift = (index * 4) as u32;

    for y in 0..height {
        let row = (y * width) as usize;
        for x in 0..width {
            frame.data[row + x as usize] = ((x + y + shift) & 0xFF) as u8;
        }
    }

    frame
}
