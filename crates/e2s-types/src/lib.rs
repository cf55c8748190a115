#![forbid(unsafe_code)]
//! Shared vocabulary for the e2s workspace.
//!
//! Unit-carrying newtypes for block, inode and group ids, the parse-layer
//! error type, little-endian read helpers, and the small amount of ext2
//! geometry arithmetic every other crate needs.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const EXT2_SUPERBLOCK_OFFSET: usize = 1024;
pub const EXT2_SUPERBLOCK_SIZE: usize = 1024;
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// Revision 0 images carry neither `s_inode_size` nor `s_first_ino`.
pub const EXT2_GOOD_OLD_REV: u32 = 0;
pub const EXT2_GOOD_OLD_INODE_SIZE: u16 = 128;
pub const EXT2_GOOD_OLD_FIRST_INO: u32 = 11;

/// On-disk size of one ext2 group descriptor.
pub const EXT2_GROUP_DESC_SIZE: usize = 32;

/// Bytes of an inode record that e2s decodes (the revision 0 layout).
pub const EXT2_INODE_BASE_SIZE: usize = 128;

// ── i_block layout ──────────────────────────────────────────────────────────

/// Number of direct block pointers in an inode.
pub const EXT2_NDIR_BLOCKS: usize = 12;
/// Slot of the single-indirect pointer.
pub const EXT2_IND_BLOCK: usize = 12;
/// Slot of the double-indirect pointer.
pub const EXT2_DIND_BLOCK: usize = 13;
/// Slot of the triple-indirect pointer.
pub const EXT2_TIND_BLOCK: usize = 14;
/// Total number of block pointer slots.
pub const EXT2_N_BLOCKS: usize = 15;

/// Symlink targets shorter than this are stored inside `i_block`.
pub const EXT2_FAST_SYMLINK_MAX: u64 = 60;

/// Fixed part of a directory entry: inode, rec_len, name_len, file_type.
pub const EXT2_DIR_ENTRY_HEADER_SIZE: usize = 8;

// ── POSIX file mode constants ────────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;
/// Permission and set-id bits.
pub const S_IPERM: u16 = 0o7777;

// ── Newtypes ────────────────────────────────────────────────────────────────

/// ext2 block number. Zero is the "absent" sentinel in pointer slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u32);

/// ext2 inode number (1-based across the whole filesystem).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

/// Block group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupNumber(pub u32);

/// Byte offset into the image (pread semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

/// Validated block size (power of two in 1024..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    pub const MIN: u32 = 1024;
    pub const MAX: u32 = 65536;

    /// Create a `BlockSize` if `value` is a power of two in [1024, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 1024..=65536",
            });
        }
        Ok(Self(value))
    }

    /// Decode `s_log_block_size` (`block_size = 1024 << log`).
    pub fn from_log(log_block_size: u32) -> Result<Self, ParseError> {
        let value = ext2_block_size_from_log(log_block_size).ok_or(ParseError::InvalidField {
            field: "s_log_block_size",
            reason: "invalid shift",
        })?;
        Self::new(value)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Block size as a buffer length.
    #[must_use]
    pub fn as_usize(self) -> usize {
        // Bounded by MAX, always fits.
        self.0 as usize
    }

    /// Number of 32-bit block pointers held by one indirect block.
    #[must_use]
    pub fn pointers_per_block(self) -> u32 {
        self.0 / 4
    }

    /// Number of bits in a one-block bitmap.
    #[must_use]
    pub fn bits_per_block(self) -> u32 {
        self.0 * 8
    }
}

impl BlockNumber {
    /// The "no block" sentinel stored in empty pointer slots.
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn is_absent(self) -> bool {
        self.0 == 0
    }
}

impl InodeNumber {
    pub const ROOT: Self = Self(2);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_owned()
}

#[must_use]
pub fn ext2_block_size_from_log(log_block_size: u32) -> Option<u32> {
    let shift = 10_u32.checked_add(log_block_size)?;
    1_u32.checked_shl(shift)
}

// ── Geometry arithmetic ─────────────────────────────────────────────────────

/// Byte offset of `block` in the image, `None` for the absent sentinel.
///
/// With 1 KiB blocks this is `1024 + (block - 1) * 1024`: the boot sector
/// fills the first kilobyte and block 1 holds the superblock. Larger block
/// sizes keep the boot sector and superblock together in block 0.
#[must_use]
pub fn block_byte_offset(block: BlockNumber, block_size: BlockSize) -> Option<ByteOffset> {
    if block.is_absent() {
        return None;
    }
    Some(ByteOffset(
        u64::from(block.0) * u64::from(block_size.get()),
    ))
}

/// `ceil(total / per_group)`, or `None` when `per_group` is zero.
#[must_use]
pub fn group_count(total: u32, per_group: u32) -> Option<u32> {
    if per_group == 0 {
        return None;
    }
    Some(total.div_ceil(per_group))
}

/// Id of the object described by bit 0 of a group's block bitmap.
#[must_use]
pub fn group_first_block(group: GroupNumber, blocks_per_group: u32, first_data_block: u32) -> u64 {
    u64::from(first_data_block) + u64::from(group.0) * u64::from(blocks_per_group)
}

/// Id of the first inode of a group (bit 0 of its inode bitmap).
#[must_use]
pub fn group_first_inode(group: GroupNumber, inodes_per_group: u32) -> u64 {
    u64::from(group.0) * u64::from(inodes_per_group) + 1
}

/// Block group holding a 1-based inode.
#[must_use]
pub fn inode_to_group(ino: InodeNumber, inodes_per_group: u32) -> GroupNumber {
    GroupNumber(ino.0.saturating_sub(1) / inodes_per_group.max(1))
}

/// Index of a 1-based inode within its group.
#[must_use]
pub fn inode_index_in_group(ino: InodeNumber, inodes_per_group: u32) -> u32 {
    ino.0.saturating_sub(1) % inodes_per_group.max(1)
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
