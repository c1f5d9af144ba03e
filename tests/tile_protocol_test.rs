//! Sender-side protocol tests: geometry, wire format, skip policy, splitter

use bytes::Bytes;
use tilecast::frame::{CropCapability, CropError, RawFrame, SoftwareCrop, TileLease, TilePool};
use tilecast::grid::{GridSpec, TileRect};
use tilecast::tile::{
    skip_tile, DescriptorError, TileFrameDescriptor, TileSplitter, DESCRIPTOR_HEADER_SIZE,
};

#[test]
fn test_rect_for_partitions_frame_exactly() {
    let grid = GridSpec::new(1920, 1080, 4, 4).unwrap();

    // Every luma pixel must be covered by exactly one tile rectangle.
    let mut coverage = vec![0u8; (1920 * 1080) as usize];
    for tile_id in 0..grid.tile_count() {
        let r = grid.rect_for(tile_id);
        for y in r.y..r.y + r.height {
            for x in r.x..r.x + r.width {
                coverage[(y * 1920 + x) as usize] += 1;
            }
        }
    }

    assert!(
        coverage.iter().all(|&c| c == 1),
        "tile rectangles must cover the frame with no gap or overlap"
    );
}

#[test]
fn test_rect_partition_odd_grid() {
    // Non-square split with rectangular tiles
    let grid = GridSpec::new(960, 540, 3, 5).unwrap();

    let mut covered = 0u64;
    for tile_id in 0..grid.tile_count() {
        let r = grid.rect_for(tile_id);
        covered += (r.width * r.height) as u64;
    }
    assert_eq!(covered, 960 * 540);
}

#[test]
fn test_descriptor_wire_roundtrip_full_tile() {
    let grid = GridSpec::new(192, 108, 2, 2).unwrap();
    let payload: Vec<u8> = (0..grid.tile_payload_len()).map(|i| (i % 251) as u8).collect();

    let d = TileFrameDescriptor {
        frame_seq: 65535,
        tile_id: 3,
        expected_mask: 0b1111,
        timestamp: u64::MAX - 1,
        payload: Bytes::from(payload.clone()),
    };

    let wire = d.to_bytes();
    assert_eq!(wire.len(), DESCRIPTOR_HEADER_SIZE + payload.len());

    let parsed = TileFrameDescriptor::from_bytes(wire).unwrap();
    assert_eq!(parsed.frame_seq, 65535);
    assert_eq!(parsed.tile_id, 3);
    assert_eq!(parsed.expected_mask, 0b1111);
    assert_eq!(parsed.timestamp, u64::MAX - 1);
    assert_eq!(&parsed.payload[..], &payload[..]);
    parsed.validate(&grid).unwrap();
}

#[test]
fn test_descriptor_truncated_rejected() {
    for len in 0..DESCRIPTOR_HEADER_SIZE {
        let result = TileFrameDescriptor::from_bytes(Bytes::from(vec![0u8; len]));
        assert!(matches!(result, Err(DescriptorError::Truncated(_))));
    }
}

#[test]
fn test_skip_policy_rotation() {
    // One tile per second, full cycle over the grid
    let seen: Vec<u16> = (0..16u64).map(|s| skip_tile(s * 1000 + 500, 16)).collect();
    let expected: Vec<u16> = (0..16).collect();
    assert_eq!(seen, expected);

    // Next round starts over
    assert_eq!(skip_tile(16_000, 16), 0);
}

#[test]
fn test_splitter_mask_excludes_skipped_tile() {
    let grid = GridSpec::new(1920, 1080, 4, 4).unwrap();
    let pool = TilePool::new(2, grid.tile_payload_len());
    let crop = SoftwareCrop::new(pool);
    let frame = RawFrame::black(1920, 1080);
    let splitter = TileSplitter::new(grid);

    let descriptors = splitter.split_frame(&crop, &frame, 1234, Some(0));

    assert_eq!(descriptors.len(), 15);
    for d in &descriptors {
        assert_eq!(d.expected_mask, 0xFFFE);
        assert_ne!(d.tile_id, 0);
        assert_eq!(d.timestamp, 1234);
    }
}

#[test]
fn test_splitter_seq_wraps_at_65536() {
    let grid = GridSpec::new(64, 32, 2, 2).unwrap();
    let pool = TilePool::new(1, grid.tile_payload_len());
    let crop = SoftwareCrop::new(pool);
    let frame = RawFrame::black(64, 32);
    let splitter = TileSplitter::new(grid);

    // Tiny grid keeps 65536 full splits cheap
    for _ in 0..65536 {
        let _ = splitter.split_frame(&crop, &frame, 0, None);
    }
    let wrapped = splitter.split_frame(&crop, &frame, 0, None);
    assert!(wrapped.iter().all(|d| d.frame_seq == 0));
}

#[test]
fn test_pool_exhaustion_is_transient() {
    let grid = GridSpec::new(64, 32, 2, 2).unwrap();
    let pool = TilePool::new(1, grid.tile_payload_len());
    let crop = SoftwareCrop::new(pool.clone());
    let frame = RawFrame::black(64, 32);

    // Hold the only buffer: crop must fail fast, not block or panic.
    let held = pool.acquire().unwrap();
    let rect = grid.rect_for(0);
    assert!(matches!(
        crop.crop(&frame, rect),
        Err(CropError::PoolExhausted)
    ));

    // Releasing the lease restores the pool.
    drop(held);
    assert!(crop.crop(&frame, rect).is_ok());
}

/// Crop collaborator that fails for one tile, to verify per-tile failure
/// isolation.
struct FlakyCrop {
    inner: SoftwareCrop,
    fail_at: TileRect,
}

impl CropCapability for FlakyCrop {
    fn crop(&self, frame: &RawFrame, rect: TileRect) -> Result<TileLease, CropError> {
        if rect == self.fail_at {
            return Err(CropError::PoolExhausted);
        }
        self.inner.crop(frame, rect)
    }
}

#[test]
fn test_crop_failure_skips_tile_not_frame() {
    let grid = GridSpec::new(64, 32, 2, 2).unwrap();
    let pool = TilePool::new(1, grid.tile_payload_len());
    let crop = FlakyCrop {
        inner: SoftwareCrop::new(pool),
        fail_at: grid.rect_for(2),
    };
    let frame = RawFrame::black(64, 32);
    let splitter = TileSplitter::new(grid);

    let descriptors = splitter.split_frame(&crop, &frame, 0, None);

    // Tile 2 dropped, the rest of the frame survives
    assert_eq!(descriptors.len(), 3);
    assert!(descriptors.iter().all(|d| d.tile_id != 2));
    // The failed tile stays in the expected mask; the receiver degrades
    assert!(descriptors.iter().all(|d| d.expected_mask == 0b1111));
    assert_eq!(splitter.get_stats().crop_failures, 1);
}

#[test]
fn test_splitter_payload_matches_source_region() {
    let grid = GridSpec::new(8, 4, 2, 2).unwrap();
    let mut frame = RawFrame::black(8, 4);
    // Tile 3 = row 1, col 1: luma origin (4, 2)
    frame.data[2 * 8 + 4] = 99;

    let pool = TilePool::new(1, grid.tile_payload_len());
    let crop = SoftwareCrop::new(pool);
    let splitter = TileSplitter::new(grid);

    let descriptors = splitter.split_frame(&crop, &frame, 0, None);
    let tile3 = descriptors.iter().find(|d| d.tile_id == 3).unwrap();
    assert_eq!(tile3.payload[0], 99);
}
