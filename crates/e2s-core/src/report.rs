//! Report records and the traversal that produces them.
//!
//! Records come out in a fixed order: the superblock; then, per group, the
//! group line followed by its free block and free inode ids; then, per
//! group and per in-use inode, the inode line, its directory entries and
//! its indirect pointers.
//!
//! `Display` renders a record as one CSV line. `Serialize` renders the same
//! fields as an object tagged with `"record"`.

use crate::{Ext2Image, GroupInfo, IndirectWalker, directory_entries};
use e2s_error::Result;
use e2s_ondisk::{Ext2FileKind, Ext2Inode};
use e2s_types::InodeNumber;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record {
    Superblock {
        total_blocks: u32,
        total_inodes: u32,
        block_size: u32,
        inode_size: u16,
        blocks_per_group: u32,
        inodes_per_group: u32,
        first_nonreserved_inode: u32,
    },
    Group {
        group: u32,
        blocks_in_group: u32,
        inodes_in_group: u32,
        free_blocks: u16,
        free_inodes: u16,
        block_bitmap: u32,
        inode_bitmap: u32,
        inode_table: u32,
    },
    Bfree {
        block: u64,
    },
    Ifree {
        inode: u64,
    },
    Inode(InodeRecord),
    Dirent {
        parent: u32,
        offset: u64,
        inode: u32,
        rec_len: u16,
        name_len: u8,
        name: String,
    },
    Indirect {
        inode: u32,
        level: u8,
        logical_offset: u64,
        referencing: u32,
        target: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InodeRecord {
    pub inode: u32,
    pub file_type: char,
    /// Permission bits, printed in octal.
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub links: u16,
    pub ctime: u32,
    pub mtime: u32,
    pub atime: u32,
    pub size: u64,
    pub blocks: u32,
    /// All 15 pointers, or only slot 0 for a fast symlink.
    pub pointers: Vec<u32>,
}

impl InodeRecord {
    #[must_use]
    pub fn new(ino: InodeNumber, inode: &Ext2Inode) -> Self {
        let pointers = if inode.is_fast_symlink() {
            vec![inode.block[0]]
        } else {
            inode.block.to_vec()
        };
        Self {
            inode: ino.0,
            file_type: inode.kind().type_char(),
            mode: inode.permission_bits(),
            uid: inode.uid,
            gid: inode.gid,
            links: inode.links_count,
            ctime: inode.ctime,
            mtime: inode.mtime,
            atime: inode.atime,
            size: inode.size,
            blocks: inode.blocks,
            pointers,
        }
    }
}

impl Record {
    #[must_use]
    pub fn group(info: &GroupInfo) -> Self {
        Self::Group {
            group: info.number.0,
            blocks_in_group: info.blocks_in_group,
            inodes_in_group: info.inodes_in_group,
            free_blocks: info.desc.free_blocks_count,
            free_inodes: info.desc.free_inodes_count,
            block_bitmap: info.desc.block_bitmap,
            inode_bitmap: info.desc.inode_bitmap,
            inode_table: info.desc.inode_table,
        }
    }

    /// CSV tag of this record.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Superblock { .. } => "SUPERBLOCK",
            Self::Group { .. } => "GROUP",
            Self::Bfree { .. } => "BFREE",
            Self::Ifree { .. } => "IFREE",
            Self::Inode(_) => "INODE",
            Self::Dirent { .. } => "DIRENT",
            Self::Indirect { .. } => "INDIRECT",
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())?;
        match self {
            Self::Superblock {
                total_blocks,
                total_inodes,
                block_size,
                inode_size,
                blocks_per_group,
                inodes_per_group,
                first_nonreserved_inode,
            } => write!(
                f,
                ",{total_blocks},{total_inodes},{block_size},{inode_size},{blocks_per_group},{inodes_per_group},{first_nonreserved_inode}"
            ),
            Self::Group {
                group,
                blocks_in_group,
                inodes_in_group,
                free_blocks,
                free_inodes,
                block_bitmap,
                inode_bitmap,
                inode_table,
            } => write!(
                f,
                ",{group},{blocks_in_group},{inodes_in_group},{free_blocks},{free_inodes},{block_bitmap},{inode_bitmap},{inode_table}"
            ),
            Self::Bfree { block } => write!(f, ",{block}"),
            Self::Ifree { inode } => write!(f, ",{inode}"),
            Self::Inode(rec) => {
                write!(
                    f,
                    ",{},{},{:o},{},{},{},{},{},{},{},{}",
                    rec.inode,
                    rec.file_type,
                    rec.mode,
                    rec.uid,
                    rec.gid,
                    rec.links,
                    format_timestamp(rec.ctime),
                    format_timestamp(rec.mtime),
                    format_timestamp(rec.atime),
                    rec.size,
                    rec.blocks,
                )?;
                for ptr in &rec.pointers {
                    write!(f, ",{ptr}")?;
                }
                Ok(())
            }
            Self::Dirent {
                parent,
                offset,
                inode,
                rec_len,
                name_len,
                name,
            } => write!(f, ",{parent},{offset},{inode},{rec_len},{name_len},'{name}'"),
            Self::Indirect {
                inode,
                level,
                logical_offset,
                referencing,
                target,
            } => write!(f, ",{inode},{level},{logical_offset},{referencing},{target}"),
        }
    }
}

// ── Timestamps ──────────────────────────────────────────────────────────────

/// Format seconds since the epoch as `mm/dd/yy hh:mm:ss` (UTC).
#[must_use]
pub fn format_timestamp(secs: u32) -> String {
    let secs = u64::from(secs);
    let (year, month, day) = civil_from_days(secs / 86_400);
    let rem = secs % 86_400;
    format!(
        "{month:02}/{day:02}/{:02} {:02}:{:02}:{:02}",
        year % 100,
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    )
}

/// Gregorian (year, month, day) for a day count since 1970-01-01.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    // Shift the epoch to 0000-03-01 so leap days fall at the end of a year.
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z % 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}

// ── Traversal ───────────────────────────────────────────────────────────────

impl Ext2Image {
    #[must_use]
    pub fn superblock_record(&self) -> Record {
        let geom = self.geometry();
        Record::Superblock {
            total_blocks: geom.blocks_count,
            total_inodes: geom.inodes_count,
            block_size: geom.block_size.get(),
            inode_size: geom.inode_size,
            blocks_per_group: geom.blocks_per_group,
            inodes_per_group: geom.inodes_per_group,
            first_nonreserved_inode: geom.first_ino,
        }
    }

    /// Produce every record in report order, handing each to `emit`.
    ///
    /// Stops at the first error from `emit` or from a structure the report
    /// cannot do without (group table, bitmaps, inode tables).
    pub fn for_each_record(&self, mut emit: impl FnMut(Record) -> Result<()>) -> Result<()> {
        emit(self.superblock_record())?;

        for group in self.groups() {
            emit(Record::group(group))?;
            for block in self.free_blocks(group)? {
                emit(Record::Bfree { block })?;
            }
            for inode in self.free_inodes(group)? {
                emit(Record::Ifree { inode })?;
            }
        }

        for group in self.groups() {
            let table = self.read_inodes(group)?;
            let mut used = 0_u32;
            for slot in table.in_use() {
                let (ino, inode) = slot?;
                used += 1;
                self.inode_records(ino, &inode, &mut emit)?;
            }
            debug!(group = group.number.0, used, "reported inodes");
        }
        Ok(())
    }

    /// Collect the whole report.
    pub fn records(&self) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        self.for_each_record(|record| {
            out.push(record);
            Ok(())
        })?;
        Ok(out)
    }

    fn inode_records(
        &self,
        ino: InodeNumber,
        inode: &Ext2Inode,
        emit: &mut impl FnMut(Record) -> Result<()>,
    ) -> Result<()> {
        emit(Record::Inode(InodeRecord::new(ino, inode)))?;

        let policy = self.options().pointer_policy;
        if inode.kind() == Ext2FileKind::Directory {
            for entry in directory_entries(self.reader(), ino, inode, policy)? {
                emit(Record::Dirent {
                    parent: ino.0,
                    offset: entry.offset,
                    inode: entry.inode.0,
                    rec_len: entry.rec_len,
                    name_len: entry.name_len,
                    name: entry.name,
                })?;
            }
        }

        if inode.has_block_map() {
            for item in IndirectWalker::for_inode(self.reader(), inode, policy) {
                match item {
                    Ok(r) => emit(Record::Indirect {
                        inode: ino.0,
                        level: r.level.get(),
                        logical_offset: r.logical_offset,
                        referencing: r.referencing.0,
                        target: r.target.0,
                    })?,
                    Err(err) => warn!(ino = ino.0, %err, "skipping unreadable indirect block"),
                }
            }
        }
        Ok(())
    }
}
