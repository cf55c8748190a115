//! Synthetic ext2 image construction.
//!
//! `ImageBuilder` lays out an mke2fs-shaped image: superblock and group
//! descriptor table at the head of group 0, then per group a block bitmap,
//! an inode bitmap and the inode table. Inodes 1..=10 are reserved, 2 is the
//! root directory and 11 is `lost+found`. Everything else is added through
//! the builder and placed in the root directory, first-fit.
//!
//! Bitmaps, free counts and directory counts are derived from what was
//! actually allocated, so the result is self-consistent.

use anyhow::{Context, Result, bail, ensure};
use e2s_types::{
    BlockSize, EXT2_GOOD_OLD_FIRST_INO, EXT2_GOOD_OLD_INODE_SIZE, EXT2_GROUP_DESC_SIZE,
    EXT2_INODE_BASE_SIZE, EXT2_N_BLOCKS, EXT2_NDIR_BLOCKS, EXT2_SUPER_MAGIC,
    EXT2_SUPERBLOCK_OFFSET, InodeNumber, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, inode_index_in_group,
    inode_to_group,
};
use std::fs;
use std::path::Path;

/// Timestamp written into every inode and the superblock.
pub const FIXED_TIME: u32 = 1_700_000_000;

const ROOT_INO: u32 = InodeNumber::ROOT.0;
const LOST_FOUND_INO: u32 = 11;
const FT_REG: u8 = 1;
const FT_DIR: u8 = 2;
const FT_SYMLINK: u8 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Regular,
    Directory,
    Symlink,
}

#[derive(Debug, Clone)]
enum Content {
    /// Regular file data at these logical block indices.
    Blocks(Vec<u64>),
    /// Directory holding `links` hard links to one shared empty file.
    Dir { links: u32 },
    Symlink(String),
}

#[derive(Debug, Clone)]
struct NodeSpec {
    name: String,
    content: Content,
}

/// An inode the builder created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltFile {
    pub name: String,
    pub ino: u32,
    pub kind: NodeKind,
    /// `(logical block, physical block)` pairs, ascending by logical block.
    pub data_blocks: Vec<(u64, u32)>,
    /// Indirect blocks in allocation order.
    pub indirect_blocks: Vec<u32>,
}

impl BuiltFile {
    fn new(name: &str, ino: u32, kind: NodeKind) -> Self {
        Self {
            name: name.to_owned(),
            ino,
            kind,
            data_blocks: Vec::new(),
            indirect_blocks: Vec::new(),
        }
    }
}

/// A finished image plus a record of where everything went.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    pub bytes: Vec<u8>,
    pub block_size: u32,
    pub groups: u32,
    pub files: Vec<BuiltFile>,
}

impl BuiltImage {
    /// Look a file up by the name it was added under (`/` for the root).
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&BuiltFile> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.bytes).with_context(|| format!("failed to write {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct ImageBuilder {
    block_size: u32,
    blocks_count: u32,
    blocks_per_group: u32,
    inodes_per_group: u32,
    inode_size: u16,
    revision: u32,
    volume_name: String,
    nodes: Vec<NodeSpec>,
}

impl Default for ImageBuilder {
    /// 1 MiB image: 1 KiB blocks, one group, 128 inodes of 128 bytes.
    fn default() -> Self {
        Self {
            block_size: 1024,
            blocks_count: 1024,
            blocks_per_group: 8192,
            inodes_per_group: 128,
            inode_size: EXT2_GOOD_OLD_INODE_SIZE,
            revision: 1,
            volume_name: "e2s-harness".to_owned(),
            nodes: Vec::new(),
        }
    }
}

impl ImageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub fn blocks_count(mut self, blocks: u32) -> Self {
        self.blocks_count = blocks;
        self
    }

    #[must_use]
    pub fn blocks_per_group(mut self, blocks: u32) -> Self {
        self.blocks_per_group = blocks;
        self
    }

    #[must_use]
    pub fn inodes_per_group(mut self, inodes: u32) -> Self {
        self.inodes_per_group = inodes;
        self
    }

    #[must_use]
    pub fn inode_size(mut self, size: u16) -> Self {
        self.inode_size = size;
        self
    }

    /// Write a revision 0 superblock (fixed 128-byte inodes, first inode 11).
    #[must_use]
    pub fn revision_zero(mut self) -> Self {
        self.revision = 0;
        self.inode_size = EXT2_GOOD_OLD_INODE_SIZE;
        self
    }

    #[must_use]
    pub fn volume_name(mut self, name: &str) -> Self {
        self.volume_name = name.to_owned();
        self
    }

    /// Regular file with `blocks` contiguous data blocks.
    #[must_use]
    pub fn add_file(self, name: &str, blocks: u64) -> Self {
        self.add_sparse_file(name, &(0..blocks).collect::<Vec<_>>())
    }

    /// Regular file with data only at the given logical blocks.
    #[must_use]
    pub fn add_sparse_file(mut self, name: &str, logical_blocks: &[u64]) -> Self {
        let mut blocks = logical_blocks.to_vec();
        blocks.sort_unstable();
        blocks.dedup();
        self.nodes.push(NodeSpec {
            name: name.to_owned(),
            content: Content::Blocks(blocks),
        });
        self
    }

    /// Subdirectory containing `links` hard links (`link-0000`, ...) to a
    /// shared empty file named `<name>.target`.
    #[must_use]
    pub fn add_dir(mut self, name: &str, links: u32) -> Self {
        self.nodes.push(NodeSpec {
            name: name.to_owned(),
            content: Content::Dir { links },
        });
        self
    }

    /// Symbolic link; targets shorter than 60 bytes live inside the inode.
    #[must_use]
    pub fn add_symlink(mut self, name: &str, target: &str) -> Self {
        self.nodes.push(NodeSpec {
            name: name.to_owned(),
            content: Content::Symlink(target.to_owned()),
        });
        self
    }

    pub fn build(&self) -> Result<BuiltImage> {
        let mut layout = Layout::new(self)?;
        layout.populate(self)?;
        Ok(layout.finish(self))
    }
}

// ── Layout ──────────────────────────────────────────────────────────────────

struct Layout {
    bs: u32,
    first_data_block: u32,
    bpg: u32,
    ipg: u32,
    inode_size: usize,
    blocks_count: u32,
    groups: u32,
    bytes: Vec<u8>,
    block_used: Vec<bool>,
    inode_used: Vec<bool>,
    inode_is_dir: Vec<bool>,
    block_bitmaps: Vec<u32>,
    inode_bitmaps: Vec<u32>,
    inode_tables: Vec<u32>,
    next_block: u32,
    files: Vec<BuiltFile>,
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

fn usize_of(n: u32) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

impl Layout {
    fn new(spec: &ImageBuilder) -> Result<Self> {
        let bs = spec.block_size;
        let bits = BlockSize::new(bs)
            .map_err(|e| anyhow::anyhow!("block size {bs}: {e}"))?
            .bits_per_block();
        ensure!(spec.blocks_count > 0, "blocks_count must be positive");
        ensure!(
            (1..=bits).contains(&spec.blocks_per_group),
            "blocks_per_group must be in 1..={bits}"
        );
        ensure!(
            (1..=bits).contains(&spec.inodes_per_group),
            "inodes_per_group must be in 1..={bits}"
        );
        let inode_size = usize::from(spec.inode_size);
        ensure!(
            inode_size >= EXT2_INODE_BASE_SIZE
                && inode_size.is_power_of_two()
                && inode_size <= usize_of(bs),
            "inode size {inode_size} unsupported"
        );

        let first_data_block = u32::from(bs == 1024);
        let groups = spec.blocks_count.div_ceil(spec.blocks_per_group);
        let inodes_total = groups
            .checked_mul(spec.inodes_per_group)
            .context("inode count overflows u32")?;
        ensure!(
            inodes_total > LOST_FOUND_INO,
            "need room for at least {} inodes",
            LOST_FOUND_INO + 1
        );
        let gdt_blocks = u32::try_from((usize_of(groups) * EXT2_GROUP_DESC_SIZE).div_ceil(usize_of(bs)))
            .context("descriptor table too large")?;
        let itable_blocks = u32::try_from(
            (usize_of(spec.inodes_per_group) * inode_size).div_ceil(usize_of(bs)),
        )
        .context("inode table too large")?;

        let image_len = usize_of(spec.blocks_count)
            .checked_mul(usize_of(bs))
            .context("image size overflows")?;
        let mut layout = Self {
            bs,
            first_data_block,
            bpg: spec.blocks_per_group,
            ipg: spec.inodes_per_group,
            inode_size,
            blocks_count: spec.blocks_count,
            groups,
            bytes: vec![0_u8; image_len],
            block_used: vec![false; usize_of(spec.blocks_count)],
            inode_used: vec![false; usize_of(inodes_total)],
            inode_is_dir: vec![false; usize_of(inodes_total)],
            block_bitmaps: Vec::new(),
            inode_bitmaps: Vec::new(),
            inode_tables: Vec::new(),
            next_block: 0,
            files: Vec::new(),
        };

        for block in 0..first_data_block {
            layout.block_used[usize_of(block)] = true;
        }
        for g in 0..groups {
            let start = first_data_block + g * spec.blocks_per_group;
            let cursor = if g == 0 { start + 1 + gdt_blocks } else { start };
            let end = cursor + 2 + itable_blocks;
            let group_end = (start + spec.blocks_per_group).min(spec.blocks_count);
            ensure!(
                end <= group_end,
                "group {g} too small for its metadata ({end} > {group_end})"
            );
            for block in start..end {
                layout.block_used[usize_of(block)] = true;
            }
            layout.block_bitmaps.push(cursor);
            layout.inode_bitmaps.push(cursor + 1);
            layout.inode_tables.push(cursor + 2);
        }
        for ino in 1..EXT2_GOOD_OLD_FIRST_INO {
            layout.inode_used[usize_of(ino - 1)] = true;
        }
        Ok(layout)
    }

    // ── Allocation ───────────────────────────────────────────────────────

    fn alloc_block(&mut self) -> Result<u32> {
        while self.next_block < self.blocks_count {
            let block = self.next_block;
            self.next_block += 1;
            let used = &mut self.block_used[usize_of(block)];
            if !*used {
                *used = true;
                return Ok(block);
            }
        }
        bail!("image full: no free block among {}", self.blocks_count)
    }

    fn alloc_inode(&mut self, dir: bool) -> Result<u32> {
        let Some(index) = self.inode_used.iter().position(|used| !used) else {
            bail!("image full: no free inode");
        };
        self.inode_used[index] = true;
        self.inode_is_dir[index] = dir;
        u32::try_from(index + 1).context("inode number overflows u32")
    }

    fn put_u16(&mut self, at: usize, v: u16) {
        self.bytes[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, at: usize, v: u32) {
        self.bytes[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn block_at(&self, block: u32) -> usize {
        usize_of(block) * usize_of(self.bs)
    }

    fn pointer(&self, block: u32, index: u64) -> u32 {
        let at = self.block_at(block) + usize::try_from(index).unwrap_or(0) * 4;
        u32::from_le_bytes([
            self.bytes[at],
            self.bytes[at + 1],
            self.bytes[at + 2],
            self.bytes[at + 3],
        ])
    }

    fn set_pointer(&mut self, block: u32, index: u64, value: u32) {
        let at = self.block_at(block) + usize::try_from(index).unwrap_or(0) * 4;
        self.put_u32(at, value);
    }

    /// Allocate a data block for `logical`, creating indirect blocks on
    /// the way down as needed.
    fn map_logical(
        &mut self,
        i_block: &mut [u32; EXT2_N_BLOCKS],
        file: &mut BuiltFile,
        logical: u64,
    ) -> Result<u32> {
        let fan_out = u64::from(self.bs / 4);
        let direct = EXT2_NDIR_BLOCKS as u64;
        if logical < direct {
            let data = self.alloc_block()?;
            i_block[usize::try_from(logical)?] = data;
            file.data_blocks.push((logical, data));
            return Ok(data);
        }

        let mut rel = logical - direct;
        let (slot, depth) = if rel < fan_out {
            (12, 1)
        } else if rel - fan_out < fan_out * fan_out {
            rel -= fan_out;
            (13, 2)
        } else {
            rel -= fan_out + fan_out * fan_out;
            ensure!(
                rel < fan_out * fan_out * fan_out,
                "logical block {logical} beyond triple indirect reach"
            );
            (14, 3)
        };

        let mut parent = i_block[slot];
        if parent == 0 {
            parent = self.alloc_block()?;
            i_block[slot] = parent;
            file.indirect_blocks.push(parent);
        }
        for level in (2..=depth).rev() {
            let index = (rel / fan_out.pow(level - 1)) % fan_out;
            let mut child = self.pointer(parent, index);
            if child == 0 {
                child = self.alloc_block()?;
                self.set_pointer(parent, index, child);
                file.indirect_blocks.push(child);
            }
            parent = child;
        }
        let data = self.alloc_block()?;
        self.set_pointer(parent, rel % fan_out, data);
        file.data_blocks.push((logical, data));
        Ok(data)
    }

    fn sectors(&self, file: &BuiltFile) -> u32 {
        let blocks = file.data_blocks.len() + file.indirect_blocks.len();
        u32::try_from(blocks).unwrap_or(u32::MAX) * (self.bs / 512)
    }

    // ── Inodes and directories ───────────────────────────────────────────

    #[allow(clippy::too_many_arguments, clippy::cast_possible_truncation)]
    fn write_inode(
        &mut self,
        ino: u32,
        mode: u16,
        uid: u16,
        links: u16,
        size: u64,
        sectors: u32,
        i_block: &[u32; EXT2_N_BLOCKS],
    ) {
        let group = inode_to_group(InodeNumber(ino), self.ipg);
        let index = inode_index_in_group(InodeNumber(ino), self.ipg);
        let at = self.block_at(self.inode_tables[usize_of(group.0)]) + usize_of(index) * self.inode_size;
        self.put_u16(at, mode);
        self.put_u16(at + 0x02, uid);
        self.put_u32(at + 0x04, (size & 0xFFFF_FFFF) as u32);
        self.put_u32(at + 0x08, FIXED_TIME);
        self.put_u32(at + 0x0C, FIXED_TIME);
        self.put_u32(at + 0x10, FIXED_TIME);
        self.put_u16(at + 0x18, uid);
        self.put_u16(at + 0x1A, links);
        self.put_u32(at + 0x1C, sectors);
        for (slot, ptr) in i_block.iter().enumerate() {
            self.put_u32(at + 0x28 + slot * 4, *ptr);
        }
        if mode & S_IFMT == S_IFREG {
            self.put_u32(at + 0x6C, (size >> 32) as u32);
        }
        if self.inode_size > EXT2_INODE_BASE_SIZE {
            // i_extra_isize
            self.put_u16(at + 0x80, 32);
        }
    }

    /// Pack `(inode, file type, name)` entries into directory blocks and map
    /// them as the directory's data. Returns the directory size.
    fn write_dir(
        &mut self,
        i_block: &mut [u32; EXT2_N_BLOCKS],
        file: &mut BuiltFile,
        entries: &[(u32, u8, String)],
    ) -> Result<u64> {
        let bs = usize_of(self.bs);
        let mut blocks: Vec<Vec<(u32, u8, &str, usize)>> = vec![Vec::new()];
        let mut used = 0_usize;
        for (ino, ft, name) in entries {
            ensure!(name.len() <= 255, "name too long: {name}");
            let len = align4(8 + name.len());
            if used + len > bs {
                blocks.push(Vec::new());
                used = 0;
            }
            if let Some(current) = blocks.last_mut() {
                current.push((*ino, *ft, name.as_str(), used));
            }
            used += len;
        }

        for (logical, block_entries) in (0_u64..).zip(&blocks) {
            let phys = self.map_logical(i_block, file, logical)?;
            let base = self.block_at(phys);
            for (n, (ino, ft, name, offset)) in block_entries.iter().enumerate() {
                let end = block_entries.get(n + 1).map_or(bs, |next| next.3);
                let at = base + offset;
                self.put_u32(at, *ino);
                self.put_u16(at + 4, u16::try_from(end - offset)?);
                self.bytes[at + 6] = u8::try_from(name.len())?;
                self.bytes[at + 7] = *ft;
                self.bytes[at + 8..at + 8 + name.len()].copy_from_slice(name.as_bytes());
            }
        }
        Ok(blocks.len() as u64 * u64::from(self.bs))
    }

    fn populate(&mut self, spec: &ImageBuilder) -> Result<()> {
        // Group metadata blocks are already claimed; data goes first-fit.
        self.inode_used[usize_of(ROOT_INO - 1)] = true;
        self.inode_is_dir[usize_of(ROOT_INO - 1)] = true;
        self.inode_used[usize_of(LOST_FOUND_INO - 1)] = true;
        self.inode_is_dir[usize_of(LOST_FOUND_INO - 1)] = true;

        // Assign inode numbers before writing anything.
        let mut assigned = Vec::with_capacity(spec.nodes.len());
        for node in &spec.nodes {
            let is_dir = matches!(node.content, Content::Dir { .. });
            let ino = self.alloc_inode(is_dir)?;
            let target = match node.content {
                Content::Dir { links } if links > 0 => Some(self.alloc_inode(false)?),
                _ => None,
            };
            assigned.push((ino, target));
        }

        let subdirs = spec
            .nodes
            .iter()
            .filter(|n| matches!(n.content, Content::Dir { .. }))
            .count();

        // Root directory.
        let mut root_entries = vec![
            (ROOT_INO, FT_DIR, ".".to_owned()),
            (ROOT_INO, FT_DIR, "..".to_owned()),
            (LOST_FOUND_INO, FT_DIR, "lost+found".to_owned()),
        ];
        for (node, (ino, _)) in spec.nodes.iter().zip(&assigned) {
            let ft = match node.content {
                Content::Blocks(_) => FT_REG,
                Content::Dir { .. } => FT_DIR,
                Content::Symlink(_) => FT_SYMLINK,
            };
            root_entries.push((*ino, ft, node.name.clone()));
        }
        let mut root = BuiltFile::new("/", ROOT_INO, NodeKind::Directory);
        let mut i_block = [0_u32; EXT2_N_BLOCKS];
        let size = self.write_dir(&mut i_block, &mut root, &root_entries)?;
        let links = u16::try_from(3 + subdirs).context("too many subdirectories")?;
        let sectors = self.sectors(&root);
        self.write_inode(ROOT_INO, S_IFDIR | 0o755, 0, links, size, sectors, &i_block);
        self.files.push(root);

        // lost+found.
        let mut lf = BuiltFile::new("lost+found", LOST_FOUND_INO, NodeKind::Directory);
        let mut i_block = [0_u32; EXT2_N_BLOCKS];
        let entries = [
            (LOST_FOUND_INO, FT_DIR, ".".to_owned()),
            (ROOT_INO, FT_DIR, "..".to_owned()),
        ];
        let size = self.write_dir(&mut i_block, &mut lf, &entries)?;
        let sectors = self.sectors(&lf);
        self.write_inode(LOST_FOUND_INO, S_IFDIR | 0o700, 0, 2, size, sectors, &i_block);
        self.files.push(lf);

        for (node, (ino, target)) in spec.nodes.iter().zip(assigned) {
            self.populate_node(node, ino, target)?;
        }
        Ok(())
    }

    fn populate_node(&mut self, node: &NodeSpec, ino: u32, target: Option<u32>) -> Result<()> {
        let mut i_block = [0_u32; EXT2_N_BLOCKS];
        match &node.content {
            Content::Blocks(logicals) => {
                let mut file = BuiltFile::new(&node.name, ino, NodeKind::Regular);
                for &logical in logicals {
                    let block = self.map_logical(&mut i_block, &mut file, logical)?;
                    let at = self.block_at(block);
                    let fill = ino.to_le_bytes()[0];
                    let bs = usize_of(self.bs);
                    self.bytes[at..at + bs].fill(fill);
                }
                let size = logicals.last().map_or(0, |last| (last + 1) * u64::from(self.bs));
                let sectors = self.sectors(&file);
                self.write_inode(ino, S_IFREG | 0o644, 1000, 1, size, sectors, &i_block);
                self.files.push(file);
            }
            Content::Dir { links } => {
                let mut dir = BuiltFile::new(&node.name, ino, NodeKind::Directory);
                let mut entries = vec![
                    (ino, FT_DIR, ".".to_owned()),
                    (ROOT_INO, FT_DIR, "..".to_owned()),
                ];
                if let Some(target) = target {
                    entries.extend((0..*links).map(|i| (target, FT_REG, format!("link-{i:04}"))));
                }
                let size = self.write_dir(&mut i_block, &mut dir, &entries)?;
                let sectors = self.sectors(&dir);
                self.write_inode(ino, S_IFDIR | 0o755, 1000, 2, size, sectors, &i_block);
                self.files.push(dir);

                if let Some(target) = target {
                    let empty = [0_u32; EXT2_N_BLOCKS];
                    let links = u16::try_from(*links).context("too many hard links")?;
                    self.write_inode(target, S_IFREG | 0o644, 1000, links, 0, 0, &empty);
                    self.files.push(BuiltFile::new(
                        &format!("{}.target", node.name),
                        target,
                        NodeKind::Regular,
                    ));
                }
            }
            Content::Symlink(path) => {
                let mut link = BuiltFile::new(&node.name, ino, NodeKind::Symlink);
                let len = path.len();
                if len < 60 {
                    let mut raw = [0_u8; 60];
                    raw[..len].copy_from_slice(path.as_bytes());
                    for (slot, chunk) in i_block.iter_mut().zip(raw.chunks_exact(4)) {
                        *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    }
                } else {
                    ensure!(len <= usize_of(self.bs), "symlink target longer than a block");
                    let block = self.map_logical(&mut i_block, &mut link, 0)?;
                    let at = self.block_at(block);
                    self.bytes[at..at + len].copy_from_slice(path.as_bytes());
                }
                let sectors = self.sectors(&link);
                self.write_inode(ino, S_IFLNK | 0o777, 1000, 1, len as u64, sectors, &i_block);
                self.files.push(link);
            }
        }
        Ok(())
    }

    // ── Bitmaps, descriptors, superblock ─────────────────────────────────

    fn finish(mut self, spec: &ImageBuilder) -> BuiltImage {
        let bits = usize_of(self.bs) * 8;
        let mut total_free_blocks = 0_u32;
        let mut total_free_inodes = 0_u32;
        let gdt = self.block_at(self.first_data_block + 1);

        for g in 0..self.groups {
            let gi = usize_of(g);
            let start = self.first_data_block + g * self.bpg;

            let bb = self.block_at(self.block_bitmaps[gi]);
            let mut free_blocks = 0_u32;
            for bit in 0..bits {
                let id = u64::from(start) + bit as u64;
                let allocated = bit >= usize_of(self.bpg)
                    || id >= u64::from(self.blocks_count)
                    || self.block_used[usize::try_from(id).unwrap_or(usize::MAX)];
                if allocated {
                    self.bytes[bb + bit / 8] |= 1 << (bit % 8);
                } else {
                    free_blocks += 1;
                }
            }

            let ib = self.block_at(self.inode_bitmaps[gi]);
            let first_index = gi * usize_of(self.ipg);
            let mut free_inodes = 0_u32;
            let mut dirs = 0_u32;
            for bit in 0..bits {
                let allocated = bit >= usize_of(self.ipg) || self.inode_used[first_index + bit];
                if allocated {
                    self.bytes[ib + bit / 8] |= 1 << (bit % 8);
                } else {
                    free_inodes += 1;
                }
                if bit < usize_of(self.ipg) && self.inode_is_dir[first_index + bit] {
                    dirs += 1;
                }
            }

            let at = gdt + gi * EXT2_GROUP_DESC_SIZE;
            self.put_u32(at, self.block_bitmaps[gi]);
            self.put_u32(at + 0x04, self.inode_bitmaps[gi]);
            self.put_u32(at + 0x08, self.inode_tables[gi]);
            self.put_u16(at + 0x0C, u16::try_from(free_blocks).unwrap_or(u16::MAX));
            self.put_u16(at + 0x0E, u16::try_from(free_inodes).unwrap_or(u16::MAX));
            self.put_u16(at + 0x10, u16::try_from(dirs).unwrap_or(u16::MAX));
            total_free_blocks += free_blocks;
            total_free_inodes += free_inodes;
        }

        let sb = EXT2_SUPERBLOCK_OFFSET;
        let log_block_size = self.bs.trailing_zeros() - 10;
        self.put_u32(sb, self.groups * self.ipg);
        self.put_u32(sb + 0x04, self.blocks_count);
        self.put_u32(sb + 0x0C, total_free_blocks);
        self.put_u32(sb + 0x10, total_free_inodes);
        self.put_u32(sb + 0x14, self.first_data_block);
        self.put_u32(sb + 0x18, log_block_size);
        self.put_u32(sb + 0x1C, log_block_size);
        self.put_u32(sb + 0x20, self.bpg);
        self.put_u32(sb + 0x24, self.bpg);
        self.put_u32(sb + 0x28, self.ipg);
        self.put_u32(sb + 0x2C, FIXED_TIME);
        self.put_u32(sb + 0x30, FIXED_TIME);
        self.put_u16(sb + 0x36, 0xFFFF); // max mount count
        self.put_u16(sb + 0x38, EXT2_SUPER_MAGIC);
        self.put_u16(sb + 0x3A, 1); // clean
        self.put_u16(sb + 0x3C, 1); // continue on errors
        self.put_u32(sb + 0x4C, spec.revision);
        if spec.revision > 0 {
            self.put_u32(sb + 0x54, EXT2_GOOD_OLD_FIRST_INO);
            self.put_u16(sb + 0x58, spec.inode_size);
            self.put_u32(sb + 0x5C, 0); // feature_compat
            self.put_u32(sb + 0x60, 0x0002); // feature_incompat: filetype
        }
        let uuid: [u8; 16] = *b"e2s-harness-uuid";
        self.bytes[sb + 0x68..sb + 0x78].copy_from_slice(&uuid);
        let name = spec.volume_name.as_bytes();
        let len = name.len().min(16);
        self.bytes[sb + 0x78..sb + 0x78 + len].copy_from_slice(&name[..len]);

        BuiltImage {
            bytes: self.bytes,
            block_size: self.bs,
            groups: self.groups,
            files: self.files,
        }
    }
}
