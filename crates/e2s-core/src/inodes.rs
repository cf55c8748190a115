//! Inode table reading.

use crate::{Ext2Image, GroupInfo, parse_error_to_e2s};
use e2s_block::BlockBuf;
use e2s_error::{E2sError, Result};
use e2s_ondisk::Ext2Inode;
use e2s_types::{BlockNumber, InodeNumber, group_first_inode};
use tracing::trace;

/// One group's inode table, read as a single contiguous run.
#[derive(Debug, Clone)]
pub struct InodeTable {
    bytes: BlockBuf,
    table_block: BlockNumber,
    inode_size: usize,
    first_id: u64,
    count: u32,
}

impl InodeTable {
    /// Number of slots covered.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Decode slot `index` (0-based within the group).
    pub fn get(&self, index: u32) -> Result<(InodeNumber, Ext2Inode)> {
        let id = u32::try_from(self.first_id + u64::from(index)).map_err(|_| {
            E2sError::InvalidGeometry(format!("inode id past u32 at slot {index}"))
        })?;
        let start = usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_mul(self.inode_size))
            .ok_or_else(|| E2sError::InvalidGeometry(format!("inode slot {index} offset")))?;
        let slot = self
            .bytes
            .as_slice()
            .get(start..)
            .unwrap_or_default();
        let inode = Ext2Inode::parse_from_bytes(slot).map_err(|e| match parse_error_to_e2s(&e) {
            E2sError::Corruption { detail, .. } => E2sError::Corruption {
                block: u64::from(self.table_block.0),
                detail: format!("inode {id}: {detail}"),
            },
            other => other,
        })?;
        Ok((InodeNumber(id), inode))
    }

    /// Every slot in id order, used or not.
    pub fn iter(&self) -> impl Iterator<Item = Result<(InodeNumber, Ext2Inode)>> + '_ {
        (0..self.count).map(|index| self.get(index))
    }

    /// Slots whose mode and link count are both non-zero.
    pub fn in_use(&self) -> impl Iterator<Item = Result<(InodeNumber, Ext2Inode)>> + '_ {
        self.iter().filter(|slot| match slot {
            Ok((ino, inode)) => {
                let used = inode.is_in_use();
                if !used {
                    trace!(ino = ino.0, "skip unused inode slot");
                }
                used
            }
            Err(_) => true,
        })
    }
}

impl Ext2Image {
    /// Read `group`'s inode table.
    ///
    /// The table spans `ceil(inodes_per_group * inode_size / block_size)`
    /// blocks from the descriptor's inode table pointer; the group's inode
    /// count selects how many slots are exposed.
    pub fn read_inodes(&self, group: &GroupInfo) -> Result<InodeTable> {
        let geom = self.geometry();
        let table_block = BlockNumber(group.desc.inode_table);
        let bytes = self.reader().read_run(table_block, geom.inode_table_blocks())?;
        trace!(
            group = group.number.0,
            block = table_block.0,
            slots = group.inodes_in_group,
            "read inode table"
        );
        Ok(InodeTable {
            bytes,
            table_block,
            inode_size: usize::from(geom.inode_size),
            first_id: group_first_inode(group.number, geom.inodes_per_group),
            count: group.inodes_in_group.min(geom.inodes_per_group),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScanOptions;
    use crate::test_image::{base_image, device, put_inode};

    fn open(raw: Vec<u8>) -> Ext2Image {
        Ext2Image::from_device(device(raw), ScanOptions::default()).expect("open")
    }

    #[test]
    fn table_covers_group_with_global_ids() {
        let mut raw = base_image();
        put_inode(&mut raw, 2, 0o040_755, 3, 1024, &[9]);
        put_inode(&mut raw, 32, 0o100_644, 1, 10, &[10]);
        let image = open(raw);
        let table = image.read_inodes(&image.groups()[0]).expect("table");
        assert_eq!(table.len(), 32);

        let (first, _) = table.get(0).expect("slot 0");
        assert_eq!(first, InodeNumber(1));
        let (last, inode) = table.get(31).expect("slot 31");
        assert_eq!(last, InodeNumber(32));
        assert_eq!(inode.size, 10);
    }

    #[test]
    fn in_use_skips_empty_slots() {
        let mut raw = base_image();
        put_inode(&mut raw, 2, 0o040_755, 3, 1024, &[9]);
        put_inode(&mut raw, 5, 0o100_644, 1, 0, &[]);
        // Garbage size and pointers, but mode 0 and no links.
        put_inode(&mut raw, 7, 0, 0, 0xFFFF_FFFF, &[1, 2, 3]);
        let image = open(raw);
        let table = image.read_inodes(&image.groups()[0]).expect("table");
        let used: Vec<u32> = table
            .in_use()
            .map(|slot| slot.map(|(ino, _)| ino.0))
            .collect::<Result<_>>()
            .expect("slots");
        assert_eq!(used, vec![2, 5]);
    }

    #[test]
    fn missing_inode_table_is_corruption() {
        let mut raw = base_image();
        // Point the table past the end of the image.
        raw[2048 + 8..2048 + 12].copy_from_slice(&1000_u32.to_le_bytes());
        let image = open(raw);
        let err = image.read_inodes(&image.groups()[0]).unwrap_err();
        assert!(matches!(err, E2sError::Corruption { block: 1000, .. }), "{err:?}");
    }
}
