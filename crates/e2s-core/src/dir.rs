//! Directory block walking.

use crate::{IndirectLevel, IndirectWalker, PointerPolicy};
use e2s_block::{BlockReader, ByteDevice};
use e2s_error::Result;
use e2s_ondisk::{DirBlockEnd, Ext2FileType, Ext2Inode, iter_dir_block};
use e2s_types::{BlockNumber, InodeNumber};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

/// A live directory entry, owned and positioned within its directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntryRecord {
    /// Byte offset from the start of the directory's data.
    pub offset: u64,
    pub inode: InodeNumber,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: Ext2FileType,
    pub name: String,
}

/// Decode the live entries of directory block `block`.
///
/// `buf` must be one block long; it is reused across calls. Offsets are
/// relative to the block; callers add `logical_block * block_size`.
pub fn scan_directory_block<D: ByteDevice>(
    reader: &BlockReader<D>,
    block: BlockNumber,
    buf: &mut [u8],
) -> Result<Vec<DirEntryRecord>> {
    reader.read_block_into(block, buf)?;
    let mut iter = iter_dir_block(buf);
    let entries = iter
        .by_ref()
        .map(|entry| DirEntryRecord {
            offset: u64::from(entry.offset),
            inode: entry.inode,
            rec_len: entry.rec_len,
            name_len: entry.name_len,
            file_type: entry.file_type,
            name: entry.name_str(),
        })
        .collect();
    match iter.end() {
        Some(DirBlockEnd::Exhausted) | None => {}
        Some(end) => trace!(block = block.0, ?end, "directory chain ended early"),
    }
    Ok(entries)
}

/// Entries of every data block of directory `dir`, in logical block order.
///
/// Data blocks are the direct pointers plus the level-1 targets of the
/// indirect trees. Offsets are directory-relative. A data block that cannot
/// be read is logged and skipped.
pub fn directory_entries<D: ByteDevice>(
    reader: &BlockReader<D>,
    dir: InodeNumber,
    inode: &Ext2Inode,
    policy: PointerPolicy,
) -> Result<Vec<DirEntryRecord>> {
    let block_size = u64::from(reader.block_size().get());
    let mut buf = reader.block_buffer();
    let mut out = Vec::new();

    let mut scan = |logical: u64, block: BlockNumber, out: &mut Vec<DirEntryRecord>| {
        match scan_directory_block(reader, block, &mut buf) {
            Ok(entries) => {
                let base = logical * block_size;
                out.extend(entries.into_iter().map(|mut entry| {
                    entry.offset += base;
                    entry
                }));
            }
            Err(err) => warn!(dir = dir.0, block = block.0, %err, "skipping unreadable directory block"),
        }
    };

    for (logical, block) in inode.direct_blocks() {
        if block.is_absent() {
            if policy == PointerPolicy::StopAtFirstZero {
                return Ok(out);
            }
            continue;
        }
        scan(u64::from(logical), block, &mut out);
    }

    for item in IndirectWalker::for_inode(reader, inode, policy) {
        match item {
            Ok(r) if r.level == IndirectLevel::Single => scan(r.logical_offset, r.target, &mut out),
            Ok(_) => {}
            Err(err) => warn!(dir = dir.0, %err, "skipping unreadable indirect block"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_image::{BS, put_dirent, put_pointers};
    use e2s_block::MemByteDevice;
    use e2s_types::BlockSize;

    fn reader(raw: Vec<u8>) -> BlockReader<MemByteDevice> {
        BlockReader::new(MemByteDevice::new(raw), BlockSize::new(1024).expect("bs"))
    }

    fn dir_inode(block: &[u32]) -> Ext2Inode {
        let mut inode = Ext2Inode::parse_from_bytes(&[0_u8; 128]).expect("inode");
        inode.mode = 0o040_755;
        inode.links_count = 2;
        inode.block[..block.len()].copy_from_slice(block);
        inode
    }

    #[test]
    fn root_block_entries_in_disk_order() {
        let mut raw = vec![0_u8; 32 * BS];
        put_dirent(&mut raw, 9, 0, 2, 12, ".");
        put_dirent(&mut raw, 9, 12, 2, 12, "..");
        put_dirent(&mut raw, 9, 24, 11, 1000, "lost+found");
        let reader = reader(raw);
        let mut buf = reader.block_buffer();
        let entries = scan_directory_block(&reader, BlockNumber(9), &mut buf).expect("scan");

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", "..", "lost+found"]);
        let offsets: Vec<u64> = entries.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        let total: u64 = entries.iter().map(|e| u64::from(e.rec_len)).sum();
        assert_eq!(total, 1024);
    }

    #[test]
    fn offsets_are_directory_relative() {
        let mut raw = vec![0_u8; 32 * BS];
        put_dirent(&mut raw, 9, 0, 2, 1024, ".");
        put_dirent(&mut raw, 10, 0, 12, 16, "a");
        put_dirent(&mut raw, 10, 16, 13, 1008, "b");
        // Logical block 12 via the single indirect block 20.
        put_pointers(&mut raw, 20, &[(0, 11)]);
        put_dirent(&mut raw, 11, 0, 14, 1024, "c");
        let reader = reader(raw);

        let mut block = [0_u32; 13];
        block[0] = 9;
        block[1] = 10;
        block[12] = 20;
        let inode = dir_inode(&block);
        let entries = directory_entries(&reader, InodeNumber(2), &inode, PointerPolicy::SkipHoles)
            .expect("entries");
        let summary: Vec<(u64, u32)> = entries.iter().map(|e| (e.offset, e.inode.0)).collect();
        assert_eq!(summary, vec![(0, 2), (1024, 12), (1040, 13), (12 * 1024, 14)]);
    }

    #[test]
    fn direct_hole_handling_follows_policy() {
        let mut raw = vec![0_u8; 32 * BS];
        put_dirent(&mut raw, 9, 0, 2, 1024, ".");
        put_dirent(&mut raw, 10, 0, 12, 1024, "late");
        let reader = reader(raw);
        let inode = dir_inode(&[9, 0, 10]);

        let skip = directory_entries(&reader, InodeNumber(2), &inode, PointerPolicy::SkipHoles)
            .expect("skip");
        assert_eq!(skip.len(), 2);
        assert_eq!(skip[1].offset, 2048);

        let stop =
            directory_entries(&reader, InodeNumber(2), &inode, PointerPolicy::StopAtFirstZero)
                .expect("stop");
        assert_eq!(stop.len(), 1);
    }

    #[test]
    fn unreadable_data_block_is_skipped() {
        let mut raw = vec![0_u8; 32 * BS];
        put_dirent(&mut raw, 9, 0, 2, 1024, ".");
        let reader = reader(raw);
        let inode = dir_inode(&[9, 5000]);
        let entries = directory_entries(&reader, InodeNumber(2), &inode, PointerPolicy::SkipHoles)
            .expect("entries");
        assert_eq!(entries.len(), 1);
    }
}
