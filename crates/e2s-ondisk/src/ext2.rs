use e2s_types::{
    BlockNumber, BlockSize, EXT2_DIR_ENTRY_HEADER_SIZE, EXT2_DIND_BLOCK, EXT2_FAST_SYMLINK_MAX,
    EXT2_GOOD_OLD_FIRST_INO, EXT2_GOOD_OLD_INODE_SIZE, EXT2_GOOD_OLD_REV, EXT2_GROUP_DESC_SIZE,
    EXT2_IND_BLOCK, EXT2_INODE_BASE_SIZE, EXT2_N_BLOCKS, EXT2_NDIR_BLOCKS, EXT2_SUPER_MAGIC,
    EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE, EXT2_TIND_BLOCK, InodeNumber, ParseError,
    S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, S_IPERM, ensure_slice, read_fixed, read_le_u16,
    read_le_u32, trim_nul_padded,
};
use serde::{Deserialize, Serialize};

// ── Superblock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub inode_size: u16,
    pub first_ino: u32,

    // ── Identity ─────────────────────────────────────────────────────────
    pub magic: u16,
    pub uuid: [u8; 16],
    pub volume_name: String,

    pub rev_level: u32,
}

impl Ext2Superblock {
    /// Parse an ext2 superblock from a 1024-byte superblock region.
    ///
    /// Only the magic number is validated. Revision 0 images get the fixed
    /// inode size and first inode that the old format implies.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u16(region, 0x38)?;
        if magic != EXT2_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(EXT2_SUPER_MAGIC),
                actual: u64::from(magic),
            });
        }

        let rev_level = read_le_u32(region, 0x4C)?;
        let (inode_size, first_ino) = if rev_level == EXT2_GOOD_OLD_REV {
            (EXT2_GOOD_OLD_INODE_SIZE, EXT2_GOOD_OLD_FIRST_INO)
        } else {
            (read_le_u16(region, 0x58)?, read_le_u32(region, 0x54)?)
        };

        Ok(Self {
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: read_le_u32(region, 0x04)?,
            reserved_blocks_count: read_le_u32(region, 0x08)?,
            free_blocks_count: read_le_u32(region, 0x0C)?,
            free_inodes_count: read_le_u32(region, 0x10)?,
            first_data_block: read_le_u32(region, 0x14)?,
            log_block_size: read_le_u32(region, 0x18)?,
            blocks_per_group: read_le_u32(region, 0x20)?,
            inodes_per_group: read_le_u32(region, 0x28)?,
            inode_size,
            first_ino,

            magic,
            uuid: read_fixed::<16>(region, 0x68)?,
            volume_name: trim_nul_padded(&read_fixed::<16>(region, 0x78)?),

            rev_level,
        })
    }

    /// Parse the superblock out of a whole in-memory image.
    pub fn parse_from_image(image: &[u8]) -> Result<Self, ParseError> {
        let region = ensure_slice(image, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE)?;
        Self::parse_superblock_region(region)
    }

    /// Block size in bytes (`1024 << s_log_block_size`).
    pub fn block_size(&self) -> Result<BlockSize, ParseError> {
        BlockSize::from_log(self.log_block_size)
    }

    /// First block of the group descriptor table: the block after the one
    /// holding the superblock.
    #[must_use]
    pub fn group_desc_block(&self) -> BlockNumber {
        BlockNumber(self.first_data_block.saturating_add(1))
    }
}

// ── Group descriptor ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl Ext2GroupDesc {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_GROUP_DESC_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_GROUP_DESC_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            block_bitmap: read_le_u32(bytes, 0x00)?,
            inode_bitmap: read_le_u32(bytes, 0x04)?,
            inode_table: read_le_u32(bytes, 0x08)?,
            free_blocks_count: read_le_u16(bytes, 0x0C)?,
            free_inodes_count: read_le_u16(bytes, 0x0E)?,
            used_dirs_count: read_le_u16(bytes, 0x10)?,
        })
    }
}

/// Parse `count` consecutive group descriptors from the start of `table`.
pub fn parse_group_desc_table(table: &[u8], count: u32) -> Result<Vec<Ext2GroupDesc>, ParseError> {
    let count = usize::try_from(count).map_err(|_| ParseError::IntegerConversion {
        field: "group_count",
    })?;
    let needed = count
        .checked_mul(EXT2_GROUP_DESC_SIZE)
        .ok_or(ParseError::IntegerConversion {
            field: "group_desc_table_len",
        })?;
    let table = ensure_slice(table, 0, needed)?;
    table
        .chunks_exact(EXT2_GROUP_DESC_SIZE)
        .map(Ext2GroupDesc::parse_from_bytes)
        .collect()
}

// ── Inode ───────────────────────────────────────────────────────────────────

/// Coarse file type, as far as the dump distinguishes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ext2FileKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

impl Ext2FileKind {
    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::Regular,
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::Symlink,
            _ => Self::Other,
        }
    }

    /// Single-character tag: `f`, `d`, `s` or `?`.
    #[must_use]
    pub fn type_char(self) -> char {
        match self {
            Self::Regular => 'f',
            Self::Directory => 'd',
            Self::Symlink => 's',
            Self::Other => '?',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Inode {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub links_count: u16,
    /// Count of 512-byte sectors.
    pub blocks: u32,

    // ── Timestamps (seconds since the epoch) ─────────────────────────────
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,

    /// `i_block`: 12 direct pointers, then single, double, triple indirect.
    pub block: [u32; EXT2_N_BLOCKS],
}

impl Ext2Inode {
    /// Parse an inode from at least 128 raw bytes.
    ///
    /// The Linux `osd2` layout supplies the high halves of uid and gid. The
    /// high 32 bits of the size (`i_size_high`, shared with `i_dir_acl`) only
    /// apply to regular files.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_INODE_BASE_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_INODE_BASE_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mode = read_le_u16(bytes, 0x00)?;
        let uid = u32::from(read_le_u16(bytes, 0x02)?) | (u32::from(read_le_u16(bytes, 0x78)?) << 16);
        let gid = u32::from(read_le_u16(bytes, 0x18)?) | (u32::from(read_le_u16(bytes, 0x7A)?) << 16);

        let size_lo = u64::from(read_le_u32(bytes, 0x04)?);
        let size_hi = if mode & S_IFMT == S_IFREG {
            u64::from(read_le_u32(bytes, 0x6C)?)
        } else {
            0
        };

        let mut block = [0_u32; EXT2_N_BLOCKS];
        for (slot, ptr) in block.iter_mut().enumerate() {
            *ptr = read_le_u32(bytes, 0x28 + slot * 4)?;
        }

        Ok(Self {
            mode,
            uid,
            gid,
            size: size_lo | (size_hi << 32),
            links_count: read_le_u16(bytes, 0x1A)?,
            blocks: read_le_u32(bytes, 0x1C)?,

            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,

            block,
        })
    }

    /// A slot is in use when both its mode and its link count are non-zero.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.mode != 0 && self.links_count != 0
    }

    #[must_use]
    pub fn kind(&self) -> Ext2FileKind {
        Ext2FileKind::from_mode(self.mode)
    }

    /// Permission bits (lower 12 bits of mode).
    #[must_use]
    pub fn permission_bits(&self) -> u16 {
        self.mode & S_IPERM
    }

    /// Symlink whose target lives in `i_block` instead of a data block.
    #[must_use]
    pub fn is_fast_symlink(&self) -> bool {
        self.kind() == Ext2FileKind::Symlink && self.size < EXT2_FAST_SYMLINK_MAX
    }

    /// Whether the block pointers address data whose layout e2s walks.
    #[must_use]
    pub fn has_block_map(&self) -> bool {
        matches!(self.kind(), Ext2FileKind::Regular | Ext2FileKind::Directory)
    }

    /// Pointer in slot `slot` of `i_block`.
    #[must_use]
    pub fn block_ptr(&self, slot: usize) -> BlockNumber {
        BlockNumber(self.block[slot])
    }

    /// The 12 direct pointers with their logical block index.
    pub fn direct_blocks(&self) -> impl Iterator<Item = (u32, BlockNumber)> + '_ {
        self.block[..EXT2_NDIR_BLOCKS]
            .iter()
            .zip(0_u32..)
            .map(|(ptr, logical)| (logical, BlockNumber(*ptr)))
    }

    /// Roots of the single, double and triple indirect trees, in order.
    #[must_use]
    pub fn indirect_roots(&self) -> [(u8, BlockNumber); 3] {
        [
            (1, self.block_ptr(EXT2_IND_BLOCK)),
            (2, self.block_ptr(EXT2_DIND_BLOCK)),
            (3, self.block_ptr(EXT2_TIND_BLOCK)),
        ]
    }
}

// ── Directory entry parsing ─────────────────────────────────────────────────

/// ext2 file type byte stored in directory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Ext2FileType {
    Unknown = 0,
    RegFile = 1,
    Dir = 2,
    Chrdev = 3,
    Blkdev = 4,
    Fifo = 5,
    Sock = 6,
    Symlink = 7,
}

impl Ext2FileType {
    #[must_use]
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => Self::RegFile,
            2 => Self::Dir,
            3 => Self::Chrdev,
            4 => Self::Blkdev,
            5 => Self::Fifo,
            6 => Self::Sock,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }
}

/// A live directory entry borrowed from its block buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ext2DirEntryRef<'a> {
    /// Byte offset of the entry inside its block.
    pub offset: u32,
    pub inode: InodeNumber,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: Ext2FileType,
    pub name: &'a [u8],
}

impl Ext2DirEntryRef<'_> {
    /// Return the name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(self.name).into_owned()
    }
}

/// Why a directory block walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirBlockEnd {
    /// Record lengths reached the end of the block.
    Exhausted,
    /// An entry recorded a zero record length.
    ZeroRecordLength { offset: u32 },
    /// Fewer than 8 bytes were left for an entry header.
    HeaderTruncated { offset: u32 },
    /// A live entry's name ran past the end of the block.
    NameOverrun { offset: u32 },
}

/// A zero-allocation iterator over the live entries of one directory block.
///
/// Entries with inode 0 are skipped. The walk advances by each entry's own
/// record length and stops at the block end, on a zero record length, or on
/// a header or name that would read past the block. Malformed chains end the
/// walk without an error; [`DirBlockIter::end`] reports why it stopped.
#[derive(Debug, Clone)]
pub struct DirBlockIter<'a> {
    block: &'a [u8],
    offset: usize,
    end: Option<DirBlockEnd>,
}

impl<'a> DirBlockIter<'a> {
    #[must_use]
    pub fn new(block: &'a [u8]) -> Self {
        Self {
            block,
            offset: 0,
            end: None,
        }
    }

    /// Why iteration stopped; `None` while entries may remain.
    #[must_use]
    pub fn end(&self) -> Option<DirBlockEnd> {
        self.end
    }

    fn finish(&mut self, reason: DirBlockEnd) -> Option<Ext2DirEntryRef<'a>> {
        self.end = Some(reason);
        None
    }

    #[allow(clippy::cast_possible_truncation)] // offsets are bounded by the block size
    fn offset_u32(&self) -> u32 {
        self.offset as u32
    }
}

impl<'a> Iterator for DirBlockIter<'a> {
    type Item = Ext2DirEntryRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end.is_some() {
            return None;
        }
        loop {
            if self.offset >= self.block.len() {
                return self.finish(DirBlockEnd::Exhausted);
            }
            let offset = self.offset_u32();
            let Ok(header) = ensure_slice(self.block, self.offset, EXT2_DIR_ENTRY_HEADER_SIZE)
            else {
                return self.finish(DirBlockEnd::HeaderTruncated { offset });
            };

            let inode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let rec_len = u16::from_le_bytes([header[4], header[5]]);
            let name_len = header[6];
            let file_type = header[7];

            if rec_len == 0 {
                return self.finish(DirBlockEnd::ZeroRecordLength { offset });
            }

            let start = self.offset;
            self.offset += usize::from(rec_len);

            if inode == 0 {
                continue;
            }

            let name_start = start + EXT2_DIR_ENTRY_HEADER_SIZE;
            let Ok(name) = ensure_slice(self.block, name_start, usize::from(name_len)) else {
                return self.finish(DirBlockEnd::NameOverrun { offset });
            };

            return Some(Ext2DirEntryRef {
                offset,
                inode: InodeNumber(inode),
                rec_len,
                name_len,
                file_type: Ext2FileType::from_raw(file_type),
                name,
            });
        }
    }
}

/// Create an iterator over the live entries of a directory block.
#[must_use]
pub fn iter_dir_block(block: &[u8]) -> DirBlockIter<'_> {
    DirBlockIter::new(block)
}

// ── Indirect pointer blocks ─────────────────────────────────────────────────

/// Decode a block of little-endian 32-bit block pointers.
///
/// A trailing partial pointer (never present in a real block) is ignored.
#[must_use]
pub fn parse_pointer_block(block: &[u8]) -> Vec<BlockNumber> {
    block
        .chunks_exact(4)
        .map(|raw| BlockNumber(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])))
        .collect()
}
