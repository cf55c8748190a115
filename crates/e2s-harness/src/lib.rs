#![forbid(unsafe_code)]
//! Test and benchmark support for e2s.
//!
//! Synthetic images come from [`ImageBuilder`]. Small on-disk structures can
//! also be stored as sparse JSON fixtures (size plus hex-encoded non-zero
//! runs) under `conformance/fixtures/`.

pub mod builder;

pub use builder::{BuiltFile, BuiltImage, FIXED_TIME, ImageBuilder, NodeKind};

use anyhow::{Context, Result, bail};
use e2s_block::MemByteDevice;
use e2s_core::{Ext2Image, ScanOptions};
use e2s_ondisk::{Ext2DirEntryRef, Ext2GroupDesc, Ext2Inode, Ext2Superblock, iter_dir_block};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseFixture {
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

impl SparseFixture {
    /// Expand into a zero-filled buffer with every write applied.
    pub fn materialize(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0_u8; self.size];
        for write in &self.writes {
            let payload = hex::decode(&write.hex)
                .with_context(|| format!("invalid hex at offset {}", write.offset))?;
            let end = write
                .offset
                .checked_add(payload.len())
                .context("fixture offset overflow")?;
            if end > bytes.len() {
                bail!(
                    "fixture write out of bounds: offset={} payload={} size={}",
                    write.offset,
                    payload.len(),
                    bytes.len()
                );
            }
            bytes[write.offset..end].copy_from_slice(&payload);
        }
        Ok(bytes)
    }
}

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;
    fixture.materialize()
}

/// Capture `len` bytes at `offset` of `image` as a sparse fixture.
///
/// Offsets inside the fixture are relative to `offset`; runs of zero bytes
/// are left out.
pub fn extract_region(image: &[u8], offset: usize, len: usize) -> Result<SparseFixture> {
    let end = offset.checked_add(len).context("region overflows")?;
    let Some(region) = image.get(offset..end) else {
        bail!(
            "region out of bounds: offset={offset} len={len} image={}",
            image.len()
        );
    };

    let mut writes = Vec::new();
    let mut pos = 0;
    while pos < region.len() {
        if region[pos] == 0 {
            pos += 1;
            continue;
        }
        let start = pos;
        while pos < region.len() && region[pos] != 0 {
            pos += 1;
        }
        writes.push(FixtureWrite {
            offset: start,
            hex: hex::encode(&region[start..pos]),
        });
    }
    Ok(SparseFixture { size: len, writes })
}

/// Capture the superblock region, laid out at its on-disk offset.
pub fn extract_ext2_superblock(image: &[u8]) -> Result<SparseFixture> {
    Ext2Superblock::parse_from_image(image).context("not an ext2 image")?;
    let mut fixture = extract_region(image, 1024, 1024)?;
    for write in &mut fixture.writes {
        write.offset += 1024;
    }
    fixture.size = 2048;
    Ok(fixture)
}

pub fn validate_superblock_fixture(path: &Path) -> Result<Ext2Superblock> {
    let data = load_sparse_fixture(path)?;
    Ext2Superblock::parse_from_image(&data)
        .with_context(|| format!("failed superblock parse for fixture {}", path.display()))
}

pub fn validate_group_desc_fixture(path: &Path) -> Result<Ext2GroupDesc> {
    let data = load_sparse_fixture(path)?;
    Ext2GroupDesc::parse_from_bytes(&data)
        .with_context(|| format!("failed group desc parse for fixture {}", path.display()))
}

pub fn validate_inode_fixture(path: &Path) -> Result<Ext2Inode> {
    let data = load_sparse_fixture(path)?;
    Ext2Inode::parse_from_bytes(&data)
        .with_context(|| format!("failed inode parse for fixture {}", path.display()))
}

/// Names and inode numbers of the live entries in a directory block fixture.
pub fn validate_dir_block_fixture(path: &Path) -> Result<Vec<(u32, String)>> {
    let data = load_sparse_fixture(path)?;
    Ok(iter_dir_block(&data)
        .map(|entry: Ext2DirEntryRef<'_>| (entry.inode.0, entry.name_str()))
        .collect())
}

/// Run the full report over an in-memory image and render CSV lines.
pub fn report_lines(bytes: &[u8], options: ScanOptions) -> Result<Vec<String>> {
    let image = Ext2Image::from_device(Box::new(MemByteDevice::new(bytes.to_vec())), options)
        .context("open image")?;
    let records = image.records().context("generate report")?;
    Ok(records.iter().map(ToString::to_string).collect())
}
