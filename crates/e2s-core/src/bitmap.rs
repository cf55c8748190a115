//! Free block and inode scanning.

use crate::{Ext2Image, GroupInfo};
use e2s_block::{BlockReader, ByteDevice};
use e2s_error::{E2sError, Result};
use e2s_ondisk::iter_free_bits;
use e2s_types::{BlockNumber, group_first_block, group_first_inode};
use tracing::trace;

/// Read the one-block bitmap at `bitmap_block` and return `id_base + bit`
/// for every zero bit among the first `count` bits, ascending.
pub fn free_ids<D: ByteDevice>(
    reader: &BlockReader<D>,
    bitmap_block: BlockNumber,
    id_base: u64,
    count: u32,
) -> Result<Vec<u64>> {
    if bitmap_block.is_absent() {
        return Err(E2sError::Corruption {
            block: 0,
            detail: "group descriptor names block 0 as a bitmap".into(),
        });
    }
    let bitmap = reader.read_block(bitmap_block)?;
    let ids: Vec<u64> = iter_free_bits(bitmap.as_slice(), count)
        .map(|bit| id_base + u64::from(bit))
        .collect();
    trace!(block = bitmap_block.0, count, free = ids.len(), "scanned bitmap");
    Ok(ids)
}

impl Ext2Image {
    /// Free block ids of `group`.
    pub fn free_blocks(&self, group: &GroupInfo) -> Result<Vec<u64>> {
        let geom = self.geometry();
        let base = group_first_block(group.number, geom.blocks_per_group, geom.first_data_block);
        free_ids(
            self.reader(),
            BlockNumber(group.desc.block_bitmap),
            base,
            group.blocks_in_group,
        )
    }

    /// Free inode ids of `group`.
    pub fn free_inodes(&self, group: &GroupInfo) -> Result<Vec<u64>> {
        let base = group_first_inode(group.number, self.geometry().inodes_per_group);
        free_ids(
            self.reader(),
            BlockNumber(group.desc.inode_bitmap),
            base,
            group.inodes_in_group,
        )
    }
}
