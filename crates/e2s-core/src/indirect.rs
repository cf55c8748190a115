//! Indirect pointer tree walking.
//!
//! The walker keeps an explicit stack of open pointer blocks instead of
//! recursing. Each frame remembers its level, the logical block index its
//! first slot maps to, and the next slot to visit. A pointer found at level
//! `n > 1` is reported before its subtree is opened, which gives depth-first
//! order: a double indirect block's reference, then the level-1 references
//! below it, then the next double indirect slot.

use crate::PointerPolicy;
use e2s_block::{BlockReader, ByteDevice};
use e2s_error::Result;
use e2s_ondisk::{Ext2Inode, parse_pointer_block};
use e2s_types::{BlockNumber, EXT2_NDIR_BLOCKS};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Depth of an indirect tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndirectLevel {
    Single = 1,
    Double = 2,
    Triple = 3,
}

impl IndirectLevel {
    #[must_use]
    pub fn get(self) -> u8 {
        self as u8
    }

    #[must_use]
    fn below(self) -> Option<Self> {
        match self {
            Self::Single => None,
            Self::Double => Some(Self::Single),
            Self::Triple => Some(Self::Double),
        }
    }

    /// Logical blocks covered by one slot of a block at this level:
    /// `fan_out^(level - 1)`.
    #[must_use]
    pub fn span(self, fan_out: u64) -> u64 {
        match self {
            Self::Single => 1,
            Self::Double => fan_out,
            Self::Triple => fan_out.saturating_mul(fan_out),
        }
    }
}

/// One non-zero pointer found inside an indirect block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectRef {
    /// Level of the block holding the pointer.
    pub level: IndirectLevel,
    /// First logical block of the file addressed through this pointer.
    pub logical_offset: u64,
    /// Block holding the pointer.
    pub referencing: BlockNumber,
    /// Value of the pointer.
    pub target: BlockNumber,
}

#[derive(Debug)]
struct Frame {
    level: IndirectLevel,
    block: BlockNumber,
    base: u64,
    pointers: Vec<BlockNumber>,
    next: usize,
}

/// Depth-first iterator over the pointers of one or more indirect trees.
///
/// Pointer blocks are read lazily; a read failure is yielded as an error
/// and the failing subtree is skipped, after which iteration continues with
/// the parent block.
pub struct IndirectWalker<'a, D: ByteDevice> {
    reader: &'a BlockReader<D>,
    policy: PointerPolicy,
    fan_out: u64,
    buf: Vec<u8>,
    /// Trees not yet started, in reverse order.
    roots: Vec<(IndirectLevel, BlockNumber, u64)>,
    /// Child block to open before visiting the next slot.
    pending: Option<(IndirectLevel, BlockNumber, u64)>,
    stack: Vec<Frame>,
}

impl<'a, D: ByteDevice> IndirectWalker<'a, D> {
    /// Walk the single tree rooted at `block`. Block 0 yields nothing.
    #[must_use]
    pub fn new(
        reader: &'a BlockReader<D>,
        level: IndirectLevel,
        block: BlockNumber,
        logical_base: u64,
        policy: PointerPolicy,
    ) -> Self {
        Self::with_roots(reader, vec![(level, block, logical_base)], policy)
    }

    /// Walk an inode's single, double and triple indirect trees in order.
    ///
    /// The trees start at logical blocks 12, `12 + fan_out` and
    /// `12 + fan_out + fan_out^2`.
    #[must_use]
    pub fn for_inode(reader: &'a BlockReader<D>, inode: &Ext2Inode, policy: PointerPolicy) -> Self {
        let fan_out = u64::from(reader.block_size().pointers_per_block());
        let mut base = EXT2_NDIR_BLOCKS as u64;
        let mut roots = Vec::with_capacity(3);
        for (depth, block) in inode.indirect_roots() {
            let level = match depth {
                1 => IndirectLevel::Single,
                2 => IndirectLevel::Double,
                _ => IndirectLevel::Triple,
            };
            roots.push((level, block, base));
            base = base.saturating_add(level.span(fan_out).saturating_mul(fan_out));
        }
        Self::with_roots(reader, roots, policy)
    }

    fn with_roots(
        reader: &'a BlockReader<D>,
        mut roots: Vec<(IndirectLevel, BlockNumber, u64)>,
        policy: PointerPolicy,
    ) -> Self {
        roots.reverse();
        Self {
            reader,
            policy,
            fan_out: u64::from(reader.block_size().pointers_per_block()),
            buf: reader.block_buffer(),
            roots,
            pending: None,
            stack: Vec::with_capacity(3),
        }
    }

    fn open(&mut self, level: IndirectLevel, block: BlockNumber, base: u64) -> Result<()> {
        self.reader.read_block_into(block, &mut self.buf)?;
        trace!(block = block.0, level = level.get(), base, "open indirect block");
        self.stack.push(Frame {
            level,
            block,
            base,
            pointers: parse_pointer_block(&self.buf),
            next: 0,
        });
        Ok(())
    }
}

impl<D: ByteDevice> Iterator for IndirectWalker<'_, D> {
    type Item = Result<IndirectRef>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((level, block, base)) = self.pending.take() {
                if let Err(err) = self.open(level, block, base) {
                    return Some(Err(err));
                }
            }

            let Some(frame) = self.stack.last_mut() else {
                let (level, block, base) = self.roots.pop()?;
                if !block.is_absent() {
                    self.pending = Some((level, block, base));
                }
                continue;
            };

            let Some(&target) = frame.pointers.get(frame.next) else {
                self.stack.pop();
                continue;
            };
            let position = frame.next as u64;
            frame.next += 1;

            if target.is_absent() {
                if self.policy == PointerPolicy::StopAtFirstZero {
                    trace!(block = frame.block.0, position, "stop at first zero pointer");
                    frame.next = frame.pointers.len();
                }
                continue;
            }

            let logical_offset = frame
                .base
                .saturating_add(position.saturating_mul(frame.level.span(self.fan_out)));
            let item = IndirectRef {
                level: frame.level,
                logical_offset,
                referencing: frame.block,
                target,
            };
            if let Some(child) = frame.level.below() {
                self.pending = Some((child, target, logical_offset));
            }
            return Some(Ok(item));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2s_block::MemByteDevice;
    use e2s_error::E2sError;
    use e2s_types::BlockSize;

    const BS: usize = 1024;

    /// Device of 64 one-KiB blocks with `(block, slot, pointer)` entries set.
    fn reader_with(pointers: &[(u32, usize, u32)]) -> BlockReader<MemByteDevice> {
        let mut raw = vec![0_u8; 64 * BS];
        for &(block, pos, ptr) in pointers {
            let at = block as usize * BS + pos * 4;
            raw[at..at + 4].copy_from_slice(&ptr.to_le_bytes());
        }
        BlockReader::new(MemByteDevice::new(raw), BlockSize::new(1024).expect("bs"))
    }

    fn walk(
        reader: &BlockReader<MemByteDevice>,
        level: IndirectLevel,
        block: u32,
        base: u64,
        policy: PointerPolicy,
    ) -> Vec<IndirectRef> {
        IndirectWalker::new(reader, level, BlockNumber(block), base, policy)
            .collect::<Result<Vec<_>>>()
            .expect("walk")
    }

    #[test]
    fn single_indirect_position_maps_past_direct_blocks() {
        let reader = reader_with(&[(20, 5, 33)]);
        let refs = walk(&reader, IndirectLevel::Single, 20, 12, PointerPolicy::SkipHoles);
        assert_eq!(
            refs,
            vec![IndirectRef {
                level: IndirectLevel::Single,
                logical_offset: 17,
                referencing: BlockNumber(20),
                target: BlockNumber(33),
            }]
        );
    }

    #[test]
    fn absent_root_reads_nothing() {
        // Block 0 would be a readable all-zero block; it must not be opened.
        let reader = reader_with(&[(0, 0, 7)]);
        assert!(walk(&reader, IndirectLevel::Triple, 0, 12, PointerPolicy::SkipHoles).is_empty());
    }

    #[test]
    fn skip_holes_continues_past_zero() {
        let reader = reader_with(&[(20, 0, 30), (20, 2, 31), (20, 255, 32)]);
        let refs = walk(&reader, IndirectLevel::Single, 20, 12, PointerPolicy::SkipHoles);
        let offsets: Vec<u64> = refs
            .iter()
            .map(|r| r.logical_offset)
            .collect();
        assert_eq!(offsets, vec![12, 14, 267]);
    }

    #[test]
    fn stop_at_first_zero_truncates_block() {
        let reader = reader_with(&[(20, 0, 30), (20, 2, 31)]);
        let refs = walk(&reader, IndirectLevel::Single, 20, 12, PointerPolicy::StopAtFirstZero);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].target, BlockNumber(30));
    }

    #[test]
    fn double_indirect_is_depth_first() {
        // DIND block 40 -> [0]=41, [1]=42; 41 -> [0]=50, [3]=51; 42 -> [0]=52.
        let reader = reader_with(&[
            (40, 0, 41),
            (40, 1, 42),
            (41, 0, 50),
            (41, 3, 51),
            (42, 0, 52),
        ]);
        let base = 12 + 256;
        let refs = walk(&reader, IndirectLevel::Double, 40, base, PointerPolicy::SkipHoles);
        let summary: Vec<(u8, u64, u32, u32)> = refs
            .iter()
            .map(|r| (r.level.get(), r.logical_offset, r.referencing.0, r.target.0))
            .collect();
        assert_eq!(
            summary,
            vec![
                (2, 268, 40, 41),
                (1, 268, 41, 50),
                (1, 271, 41, 51),
                (2, 524, 40, 42),
                (1, 524, 42, 52),
            ]
        );
    }

    #[test]
    fn triple_indirect_offsets() {
        let base = 12 + 256 + 65536;
        let reader = reader_with(&[(40, 1, 41), (41, 2, 42), (42, 3, 43)]);
        let refs = walk(&reader, IndirectLevel::Triple, 40, base, PointerPolicy::SkipHoles);
        let offsets: Vec<(u8, u64)> = refs
            .iter()
            .map(|r| (r.level.get(), r.logical_offset))
            .collect();
        assert_eq!(
            offsets,
            vec![
                (3, base + 65536),
                (2, base + 65536 + 2 * 256),
                (1, base + 65536 + 2 * 256 + 3),
            ]
        );
    }

    #[test]
    fn unreadable_child_is_reported_and_skipped() {
        // Pointer 5000 lies far beyond the 64-block device.
        let reader = reader_with(&[(40, 0, 5000), (40, 1, 41), (41, 0, 50)]);
        let root = BlockNumber(40);
        let items: Vec<Result<IndirectRef>> =
            IndirectWalker::new(&reader, IndirectLevel::Double, root, 268, PointerPolicy::SkipHoles)
                .collect();
        assert_eq!(items.len(), 4);
        assert_eq!(items[0].as_ref().map(|r| r.target.0).ok(), Some(5000));
        assert!(matches!(items[1], Err(E2sError::Corruption { block: 5000, .. })));
        assert_eq!(items[2].as_ref().map(|r| r.target.0).ok(), Some(41));
        assert_eq!(items[3].as_ref().map(|r| r.target.0).ok(), Some(50));
    }

    #[test]
    fn inode_roots_use_cumulative_bases() {
        let reader = reader_with(&[(20, 0, 30), (21, 0, 22), (22, 1, 31)]);
        let mut inode = Ext2Inode::parse_from_bytes(&[0_u8; 128]).expect("inode");
        inode.block[12] = 20;
        inode.block[13] = 21;
        let walker = IndirectWalker::for_inode(&reader, &inode, PointerPolicy::SkipHoles);
        let refs: Vec<(u8, u64)> = walker
            .map(|r| r.map(|r| (r.level.get(), r.logical_offset)))
            .collect::<Result<_>>()
            .expect("walk");
        assert_eq!(refs, vec![(1, 12), (2, 268), (1, 269)]);
    }
}
