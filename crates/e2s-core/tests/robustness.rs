//! Garbage in, error or report out: never a panic.

use e2s_block::MemByteDevice;
use e2s_core::{Ext2Image, PointerPolicy, RemainderRule, ScanOptions};
use e2s_types::EXT2_SUPER_MAGIC;

/// Deterministic xorshift bytes.
fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state.to_le_bytes()[0]
        })
        .collect()
}

/// Random image with a valid magic and a plausible, small geometry so the
/// traversal actually runs over garbage metadata.
fn plausible_noise(seed: u64) -> Vec<u8> {
    let mut image = noise(seed, 64 * 1024);
    let sb = 1024;
    image[sb..sb + 4].copy_from_slice(&64_u32.to_le_bytes()); // inodes
    image[sb + 4..sb + 8].copy_from_slice(&64_u32.to_le_bytes()); // blocks
    image[sb + 0x14..sb + 0x18].copy_from_slice(&1_u32.to_le_bytes());
    image[sb + 0x18..sb + 0x1C].copy_from_slice(&0_u32.to_le_bytes());
    image[sb + 0x20..sb + 0x24].copy_from_slice(&8192_u32.to_le_bytes());
    image[sb + 0x28..sb + 0x2C].copy_from_slice(&64_u32.to_le_bytes());
    image[sb + 0x38..sb + 0x3A].copy_from_slice(&EXT2_SUPER_MAGIC.to_le_bytes());
    image[sb + 0x4C..sb + 0x50].copy_from_slice(&0_u32.to_le_bytes());
    // Keep bitmaps and inode table inside the image.
    let gd = 2048;
    image[gd..gd + 4].copy_from_slice(&3_u32.to_le_bytes());
    image[gd + 4..gd + 8].copy_from_slice(&4_u32.to_le_bytes());
    image[gd + 8..gd + 12].copy_from_slice(&5_u32.to_le_bytes());
    image
}

fn run(raw: Vec<u8>, options: ScanOptions) {
    if let Ok(image) = Ext2Image::from_device(Box::new(MemByteDevice::new(raw)), options) {
        let _ = image.records();
    }
}

#[test]
fn random_bytes_never_panic() {
    for seed in 0..32 {
        run(noise(seed, 16 * 1024), ScanOptions::default());
    }
}

#[test]
fn random_metadata_with_valid_geometry_never_panics() {
    let legacy = ScanOptions {
        pointer_policy: PointerPolicy::StopAtFirstZero,
        remainder_rule: RemainderRule::LegacyModulo,
    };
    for seed in 0..32 {
        run(plausible_noise(seed), ScanOptions::default());
        run(plausible_noise(seed), legacy);
    }
}

#[test]
fn random_metadata_reports_superblock_first() {
    for seed in 100..108 {
        let image = Ext2Image::from_device(
            Box::new(MemByteDevice::new(plausible_noise(seed))),
            ScanOptions::default(),
        )
        .expect("geometry is valid");
        if let Ok(records) = image.records() {
            assert_eq!(records.first().map(e2s_core::Record::tag), Some("SUPERBLOCK"));
        }
    }
}

#[test]
fn huge_geometry_fails_cleanly() {
    let mut raw = plausible_noise(7);
    // One block per group: four billion descriptors that cannot be read.
    raw[1024 + 4..1024 + 8].copy_from_slice(&u32::MAX.to_le_bytes());
    raw[1024 + 0x20..1024 + 0x24].copy_from_slice(&1_u32.to_le_bytes());
    let err = Ext2Image::from_device(Box::new(MemByteDevice::new(raw)), ScanOptions::default())
        .unwrap_err();
    assert_eq!(err.exit_code(), 1);
}
