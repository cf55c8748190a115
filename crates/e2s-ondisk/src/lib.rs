#![forbid(unsafe_code)]
//! On-disk format parsing for ext2 structures.
//!
//! Pure parsing crate: no I/O and no side effects. Parses byte slices into
//! typed Rust structures representing the ext2 superblock, group
//! descriptors, inodes, directory entry chains, indirect pointer blocks and
//! allocation bitmaps.

pub mod bitmap;
pub mod ext2;

pub use bitmap::{FreeBits, bitmap_count_free, bitmap_get, iter_free_bits};
pub use ext2::{
    DirBlockEnd, DirBlockIter, Ext2DirEntryRef, Ext2FileKind, Ext2FileType, Ext2GroupDesc,
    Ext2Inode, Ext2Superblock, iter_dir_block, parse_group_desc_table, parse_pointer_block,
};
