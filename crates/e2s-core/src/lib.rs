#![forbid(unsafe_code)]
//! ext2 image traversal.
//!
//! `Ext2Image` bundles the geometry derived from the superblock, the group
//! descriptor table and a positioned block reader. The traversal modules
//! borrow it immutably: bitmap scanning, inode table reading, directory
//! block walking, indirect pointer tree walking, and the report generator
//! that stitches them into the record stream.

pub mod bitmap;
pub mod dir;
pub mod indirect;
pub mod inodes;
pub mod report;

use e2s_block::{BlockReader, ByteDevice, FileByteDevice, read_ext2_superblock_region};
use e2s_error::{E2sError, Result};
use e2s_ondisk::{Ext2GroupDesc, Ext2Superblock, parse_group_desc_table};
use e2s_types::{
    BlockSize, EXT2_GROUP_DESC_SIZE, EXT2_INODE_BASE_SIZE, GroupNumber, ParseError, group_count,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub use dir::{DirEntryRecord, directory_entries, scan_directory_block};
pub use indirect::{IndirectLevel, IndirectRef, IndirectWalker};
pub use inodes::InodeTable;
pub use report::{Record, format_timestamp};

// ── Options ─────────────────────────────────────────────────────────────────

/// How the indirect walker treats an empty (zero) pointer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PointerPolicy {
    /// Skip the empty slot and keep scanning the block. Safe for sparse files.
    #[default]
    SkipHoles,
    /// Treat the first empty slot as the end of the block's pointers.
    StopAtFirstZero,
}

/// How the last group's block and inode counts are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RemainderRule {
    /// `total mod per_group`, or `per_group` when the division is exact.
    #[default]
    ExactMultipleAware,
    /// Plain `total mod per_group`; reports 0 on an exact multiple.
    LegacyModulo,
}

impl RemainderRule {
    /// Object count of group `group` out of `groups`.
    #[must_use]
    pub fn count_in_group(self, group: u32, groups: u32, total: u32, per_group: u32) -> u32 {
        if per_group == 0 {
            return 0;
        }
        if group.saturating_add(1) < groups {
            return per_group;
        }
        let remainder = total % per_group;
        match self {
            Self::ExactMultipleAware if remainder == 0 => per_group,
            Self::ExactMultipleAware | Self::LegacyModulo => remainder,
        }
    }
}

/// Options controlling how an image is scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanOptions {
    pub pointer_policy: PointerPolicy,
    pub remainder_rule: RemainderRule,
}

// ── Geometry ────────────────────────────────────────────────────────────────

/// Geometry derived once from the superblock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Geometry {
    pub block_size: BlockSize,
    pub blocks_count: u32,
    pub inodes_count: u32,
    pub inode_size: u16,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub first_ino: u32,
    pub first_data_block: u32,
    pub groups_count: u32,
}

impl Ext2Geometry {
    /// Derive geometry, rejecting values that make the arithmetic impossible.
    pub fn from_superblock(sb: &Ext2Superblock) -> Result<Self> {
        let block_size = sb.block_size().map_err(|e| parse_error_to_e2s(&e))?;
        if sb.blocks_per_group == 0 {
            return Err(E2sError::InvalidGeometry("blocks_per_group is zero".into()));
        }
        if sb.inodes_per_group == 0 {
            return Err(E2sError::InvalidGeometry("inodes_per_group is zero".into()));
        }
        let inode_size = usize::from(sb.inode_size);
        if inode_size < EXT2_INODE_BASE_SIZE || inode_size > block_size.as_usize() {
            return Err(E2sError::InvalidGeometry(format!(
                "inode_size {} outside {EXT2_INODE_BASE_SIZE}..={}",
                sb.inode_size,
                block_size.get()
            )));
        }
        let groups_count = group_count(sb.blocks_count, sb.blocks_per_group)
            .ok_or_else(|| E2sError::InvalidGeometry("blocks_per_group is zero".into()))?;

        Ok(Self {
            block_size,
            blocks_count: sb.blocks_count,
            inodes_count: sb.inodes_count,
            inode_size: sb.inode_size,
            blocks_per_group: sb.blocks_per_group,
            inodes_per_group: sb.inodes_per_group,
            first_ino: sb.first_ino,
            first_data_block: sb.first_data_block,
            groups_count,
        })
    }

    /// Blocks spanned by one group's inode table.
    #[must_use]
    pub fn inode_table_blocks(&self) -> u32 {
        let bytes = u64::from(self.inodes_per_group) * u64::from(self.inode_size);
        let blocks = bytes.div_ceil(u64::from(self.block_size.get()));
        // inode_size <= block_size, so this is at most inodes_per_group.
        u32::try_from(blocks).unwrap_or(u32::MAX)
    }
}

/// One block group: its descriptor plus the object counts it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub number: GroupNumber,
    pub blocks_in_group: u32,
    pub inodes_in_group: u32,
    pub desc: Ext2GroupDesc,
}

// ── Error conversion ────────────────────────────────────────────────────────

/// Map a byte-level parse failure onto the runtime error taxonomy.
pub(crate) fn parse_error_to_e2s(e: &ParseError) -> E2sError {
    match e {
        ParseError::InvalidMagic { .. } => E2sError::NotExt2,
        ParseError::InvalidField { field, reason } => {
            if field.contains("block_size")
                || field.contains("per_group")
                || field.contains("inode_size")
                || field.contains("group_count")
            {
                E2sError::InvalidGeometry(format!("{field}: {reason}"))
            } else {
                E2sError::Corruption {
                    block: 0,
                    detail: e.to_string(),
                }
            }
        }
        ParseError::InsufficientData { .. } | ParseError::IntegerConversion { .. } => {
            E2sError::Corruption {
                block: 0,
                detail: e.to_string(),
            }
        }
    }
}

// ── Image ───────────────────────────────────────────────────────────────────

/// An opened ext2 image, ready for traversal.
///
/// Construction reads the superblock and the whole group descriptor table;
/// everything after that is read on demand with positioned reads.
pub struct Ext2Image {
    geometry: Ext2Geometry,
    groups: Vec<GroupInfo>,
    reader: BlockReader<Box<dyn ByteDevice>>,
    options: ScanOptions,
}

impl std::fmt::Debug for Ext2Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ext2Image")
            .field("geometry", &self.geometry)
            .field("groups", &self.groups.len())
            .field("options", &self.options)
            .field("dev_len", &self.reader.device().len_bytes())
            .finish_non_exhaustive()
    }
}

impl Ext2Image {
    /// Open the image at `path` read-only.
    pub fn open(path: impl AsRef<Path>, options: ScanOptions) -> Result<Self> {
        let dev = FileByteDevice::open(path.as_ref())?;
        Self::from_device(Box::new(dev), options)
    }

    /// Open an image from an already-opened device.
    pub fn from_device(dev: Box<dyn ByteDevice>, options: ScanOptions) -> Result<Self> {
        let region = read_ext2_superblock_region(&*dev)?;
        let superblock =
            Ext2Superblock::parse_superblock_region(&region).map_err(|e| parse_error_to_e2s(&e))?;
        let geometry = Ext2Geometry::from_superblock(&superblock)?;
        debug!(
            block_size = geometry.block_size.get(),
            blocks = geometry.blocks_count,
            inodes = geometry.inodes_count,
            groups = geometry.groups_count,
            inode_size = geometry.inode_size,
            "decoded superblock"
        );

        let reader = BlockReader::new(dev, geometry.block_size);
        let groups = read_groups(&reader, &superblock, &geometry, options.remainder_rule)?;

        Ok(Self {
            geometry,
            groups,
            reader,
            options,
        })
    }

    #[must_use]
    pub fn geometry(&self) -> &Ext2Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn groups(&self) -> &[GroupInfo] {
        &self.groups
    }

    #[must_use]
    pub fn options(&self) -> ScanOptions {
        self.options
    }

    #[must_use]
    pub fn reader(&self) -> &BlockReader<Box<dyn ByteDevice>> {
        &self.reader
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.geometry.block_size
    }
}

/// Read the contiguous group descriptor table that follows the superblock.
fn read_groups<D: ByteDevice>(
    reader: &BlockReader<D>,
    sb: &Ext2Superblock,
    geometry: &Ext2Geometry,
    rule: RemainderRule,
) -> Result<Vec<GroupInfo>> {
    let count = geometry.groups_count;
    if count == 0 {
        return Ok(Vec::new());
    }
    let table_bytes = u64::from(count) * EXT2_GROUP_DESC_SIZE as u64;
    let table_blocks = u32::try_from(table_bytes.div_ceil(u64::from(geometry.block_size.get())))
        .map_err(|_| E2sError::InvalidGeometry(format!("{count} groups")))?;
    let gdt_block = sb.group_desc_block();
    let table = reader.read_run(gdt_block, table_blocks)?;
    let descs = parse_group_desc_table(table.as_slice(), count).map_err(|e| {
        let mut err = parse_error_to_e2s(&e);
        if let E2sError::Corruption { block, .. } = &mut err {
            *block = u64::from(gdt_block.0);
        }
        err
    })?;

    Ok(descs
        .into_iter()
        .zip(0_u32..)
        .map(|(desc, g)| {
            let info = GroupInfo {
                number: GroupNumber(g),
                blocks_in_group: rule.count_in_group(
                    g,
                    count,
                    geometry.blocks_count,
                    geometry.blocks_per_group,
                ),
                inodes_in_group: rule.count_in_group(
                    g,
                    count,
                    geometry.inodes_count,
                    geometry.inodes_per_group,
                ),
                desc,
            };
            debug!(
                group = g,
                blocks = info.blocks_in_group,
                inodes = info.inodes_in_group,
                inode_table = info.desc.inode_table,
                "group descriptor"
            );
            info
        })
        .collect())
}


#[cfg(test)]
mod tests {
    use super::test_image::{base_image, device};
    use super::*;

    fn open(image: Vec<u8>) -> Result<Ext2Image> {
        Ext2Image::from_device(device(image), ScanOptions::default())
    }

    #[test]
    fn scan_options_default_is_sparse_safe() {
        let opts = ScanOptions::default();
        assert_eq!(opts.pointer_policy, PointerPolicy::SkipHoles);
        assert_eq!(opts.remainder_rule, RemainderRule::ExactMultipleAware);
    }

    #[test]
    fn remainder_rule_exact_multiple() {
        let exact = RemainderRule::ExactMultipleAware;
        let legacy = RemainderRule::LegacyModulo;
        // 16384 blocks in 2 groups of 8192.
        assert_eq!(exact.count_in_group(0, 2, 16384, 8192), 8192);
        assert_eq!(exact.count_in_group(1, 2, 16384, 8192), 8192);
        assert_eq!(legacy.count_in_group(1, 2, 16384, 8192), 0);
        // 20000 blocks: the last group holds the remainder under both rules.
        assert_eq!(exact.count_in_group(2, 3, 20000, 8192), 3616);
        assert_eq!(legacy.count_in_group(2, 3, 20000, 8192), 3616);
        assert_eq!(exact.count_in_group(0, 1, 1024, 8192), 1024);
    }

    #[test]
    fn open_decodes_single_group() {
        let image = open(base_image()).expect("open");
        let geom = image.geometry();
        assert_eq!(geom.block_size.get(), 1024);
        assert_eq!(geom.groups_count, 1);
        assert_eq!(geom.inode_size, 128);
        assert_eq!(geom.first_ino, 11);
        assert_eq!(geom.inode_table_blocks(), 4);

        let groups = image.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].blocks_in_group, 64);
        assert_eq!(groups[0].inodes_in_group, 32);
        assert_eq!(groups[0].desc.inode_table, 5);
        assert_eq!(groups[0].desc.free_blocks_count, 55);
    }

    #[test]
    fn bad_magic_is_not_ext2() {
        let mut raw = base_image();
        raw[1024 + 0x38] = 0x00;
        let err = open(raw).unwrap_err();
        assert!(matches!(err, E2sError::NotExt2));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn zero_per_group_counts_are_geometry_errors() {
        let mut raw = base_image();
        raw[1024 + 0x20..1024 + 0x24].copy_from_slice(&0_u32.to_le_bytes());
        assert!(matches!(open(raw).unwrap_err(), E2sError::InvalidGeometry(_)));

        let mut raw = base_image();
        raw[1024 + 0x28..1024 + 0x2C].copy_from_slice(&0_u32.to_le_bytes());
        assert!(matches!(open(raw).unwrap_err(), E2sError::InvalidGeometry(_)));

        let mut raw = base_image();
        raw[1024 + 0x18..1024 + 0x1C].copy_from_slice(&30_u32.to_le_bytes());
        assert!(matches!(open(raw).unwrap_err(), E2sError::InvalidGeometry(_)));
    }

    #[test]
    fn truncated_image_is_corruption() {
        let raw = base_image();
        let err = open(raw[..1500].to_vec()).unwrap_err();
        assert!(matches!(err, E2sError::Corruption { .. }), "{err:?}");
        assert_eq!(err.exit_code(), 1);

        // Superblock present, descriptor table missing.
        let err = open(raw[..2048].to_vec()).unwrap_err();
        assert!(matches!(err, E2sError::Corruption { block: 2, .. }), "{err:?}");
    }

    #[test]
    fn parse_error_mapping() {
        assert!(matches!(
            parse_error_to_e2s(&ParseError::InvalidMagic {
                expected: 0xEF53,
                actual: 0
            }),
            E2sError::NotExt2
        ));
        assert!(matches!(
            parse_error_to_e2s(&ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "invalid shift"
            }),
            E2sError::InvalidGeometry(_)
        ));
        assert!(matches!(
            parse_error_to_e2s(&ParseError::InvalidField {
                field: "offset",
                reason: "overflow"
            }),
            E2sError::Corruption { .. }
        ));
        assert!(matches!(
            parse_error_to_e2s(&ParseError::InsufficientData {
                needed: 32,
                offset: 0,
                actual: 4
            }),
            E2sError::Corruption { .. }
        ));
    }
}
