#![forbid(unsafe_code)]
//! Read-only block access for ext2 images.
//!
//! Provides the `ByteDevice` trait (positioned reads, no shared cursor),
//! a file-backed implementation using `pread`, an in-memory implementation
//! for tests, and `BlockReader`, which turns block numbers into byte ranges.

use e2s_error::{E2sError, Result};
use e2s_types::{
    BlockNumber, BlockSize, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE, block_byte_offset,
};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Owned buffer holding one or more consecutive blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed, read-only device (pread semantics).
///
/// Every read names its own offset, so calls may be reordered freely.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl<D: ByteDevice + ?Sized> ByteDevice for &D {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

impl<D: ByteDevice + ?Sized> ByteDevice for Box<D> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

fn check_range(offset: u64, len: usize, device_len: u64) -> Result<()> {
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len))
        .ok_or_else(|| E2sError::Corruption {
            block: 0,
            detail: format!("read range overflows u64: offset={offset} len={len}"),
        })?;
    if end > device_len {
        return Err(E2sError::Corruption {
            block: 0,
            detail: format!(
                "read out of bounds: offset={offset} len={len} image_len={device_len}"
            ),
        });
    }
    Ok(())
}

/// File-backed byte device using `pread` style I/O.
///
/// The file is opened read-only; `std::os::unix::fs::FileExt` reads do not
/// touch a shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let unreadable = |source| E2sError::ImageUnreadable {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(unreadable)?;
        let len = file.metadata().map_err(unreadable)?.len();
        trace!(path = %path.display(), len, "opened image");
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

/// In-memory byte device, used for synthesized images.
#[derive(Debug, Clone)]
pub struct MemByteDevice {
    bytes: Arc<[u8]>,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::from(bytes),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len_bytes())?;
        // check_range bounded offset + len by the slice length.
        let start = usize::try_from(offset).map_err(|_| E2sError::Corruption {
            block: 0,
            detail: format!("offset {offset} does not fit usize"),
        })?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}

/// Read the raw superblock region (1024 bytes at offset 1024).
pub fn read_ext2_superblock_region(dev: &dyn ByteDevice) -> Result<[u8; EXT2_SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; EXT2_SUPERBLOCK_SIZE];
    dev.read_exact_at(EXT2_SUPERBLOCK_OFFSET as u64, &mut buf)?;
    Ok(buf)
}

/// Block-addressed view of a `ByteDevice`.
///
/// Block 0 is the absent-pointer sentinel; asking for it is reported as
/// corruption rather than read.
#[derive(Debug, Clone)]
pub struct BlockReader<D: ByteDevice> {
    dev: D,
    block_size: BlockSize,
}

impl<D: ByteDevice> BlockReader<D> {
    #[must_use]
    pub fn new(dev: D, block_size: BlockSize) -> Self {
        Self { dev, block_size }
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.dev
    }

    /// A zeroed buffer of exactly one block, for reuse with `read_block_into`.
    #[must_use]
    pub fn block_buffer(&self) -> Vec<u8> {
        vec![0_u8; self.block_size.as_usize()]
    }

    fn offset_of(&self, block: BlockNumber) -> Result<u64> {
        block_byte_offset(block, self.block_size)
            .map(|offset| offset.0)
            .ok_or_else(|| E2sError::Corruption {
                block: 0,
                detail: "attempted to dereference absent block 0".to_owned(),
            })
    }

    /// Read `buf.len()` bytes starting at the first byte of `block`.
    ///
    /// `buf` is normally one block long; longer buffers read a contiguous run.
    pub fn read_block_into(&self, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        let offset = self.offset_of(block)?;
        trace!(block = block.0, offset, len = buf.len(), "read");
        self.dev
            .read_exact_at(offset, buf)
            .map_err(|err| match err {
                E2sError::Corruption { detail, .. } => E2sError::Corruption {
                    block: u64::from(block.0),
                    detail,
                },
                other => other,
            })
    }

    /// Read one block into a fresh buffer.
    pub fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        let mut buf = self.block_buffer();
        self.read_block_into(block, &mut buf)?;
        Ok(BlockBuf::new(buf))
    }

    /// Read `count` consecutive blocks starting at `first` as one run.
    pub fn read_run(&self, first: BlockNumber, count: u32) -> Result<BlockBuf> {
        let len = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(self.block_size.as_usize()))
            .ok_or_else(|| E2sError::Corruption {
                block: u64::from(first.0),
                detail: format!("run of {count} blocks overflows usize"),
            })?;
        // Bounds-check before allocating: `count` comes from on-disk fields.
        let offset = self.offset_of(first)?;
        check_range(offset, len, self.dev.len_bytes()).map_err(|err| match err {
            E2sError::Corruption { detail, .. } => E2sError::Corruption {
                block: u64::from(first.0),
                detail,
            },
            other => other,
        })?;
        let mut buf = vec![0_u8; len];
        self.read_block_into(first, &mut buf)?;
        Ok(BlockBuf::new(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i / 1024) as u8).collect()
    }

    fn one_kib_reader(bytes: Vec<u8>) -> BlockReader<MemByteDevice> {
        BlockReader::new(MemByteDevice::new(bytes), BlockSize::new(1024).unwrap())
    }

    #[test]
    fn mem_device_reads_exact_ranges() {
        let dev = MemByteDevice::new(patterned(4096));
        let mut buf = [0_u8; 4];
        dev.read_exact_at(2046, &mut buf).expect("read");
        assert_eq!(buf, [1, 1, 2, 2]);
        assert_eq!(dev.len_bytes(), 4096);
    }

    #[test]
    fn mem_device_rejects_out_of_bounds() {
        let dev = MemByteDevice::new(vec![0; 100]);
        let mut buf = [0_u8; 8];
        let err = dev.read_exact_at(96, &mut buf).unwrap_err();
        assert!(matches!(err, E2sError::Corruption { .. }), "{err:?}");
        assert!(dev.read_exact_at(u64::MAX, &mut buf).is_err());
    }

    #[test]
    fn superblock_region_starts_at_one_kib() {
        let dev = MemByteDevice::new(patterned(3072));
        let region = read_ext2_superblock_region(&dev).expect("region");
        assert!(region.iter().all(|b| *b == 1));
    }

    #[test]
    fn block_reader_maps_one_kib_blocks() {
        let reader = one_kib_reader(patterned(8 * 1024));
        let block = reader.read_block(BlockNumber(3)).expect("block 3");
        assert_eq!(block.as_slice().len(), 1024);
        assert!(block.as_slice().iter().all(|b| *b == 3));
    }

    #[test]
    fn block_reader_refuses_block_zero() {
        let reader = one_kib_reader(vec![0; 4096]);
        let err = reader.read_block(BlockNumber::NONE).unwrap_err();
        assert!(matches!(err, E2sError::Corruption { block: 0, .. }));
    }

    #[test]
    fn block_reader_tags_short_reads_with_block_number() {
        let reader = one_kib_reader(vec![0; 4096]);
        let err = reader.read_block(BlockNumber(9)).unwrap_err();
        assert!(
            matches!(err, E2sError::Corruption { block: 9, .. }),
            "unexpected error {err:?}"
        );
    }

    #[test]
    fn block_reader_reads_contiguous_runs() {
        let reader = one_kib_reader(patterned(8 * 1024));
        let run = reader.read_run(BlockNumber(2), 3).expect("run");
        let bytes = run.into_inner();
        assert_eq!(bytes.len(), 3 * 1024);
        assert_eq!(bytes[0], 2);
        assert_eq!(bytes[1024], 3);
        assert_eq!(bytes[3 * 1024 - 1], 4);
    }

    #[test]
    fn oversized_run_is_rejected_before_reading() {
        let reader = one_kib_reader(vec![0; 4096]);
        let err = reader.read_run(BlockNumber(1), u32::MAX).unwrap_err();
        assert!(matches!(err, E2sError::Corruption { block: 1, .. }), "{err:?}");
    }

    #[test]
    fn block_reader_reuses_caller_buffer() {
        let reader = one_kib_reader(patterned(8 * 1024));
        let mut buf = reader.block_buffer();
        reader.read_block_into(BlockNumber(1), &mut buf).expect("first");
        assert!(buf.iter().all(|b| *b == 1));
        reader.read_block_into(BlockNumber(5), &mut buf).expect("second");
        assert!(buf.iter().all(|b| *b == 5));
    }

    #[test]
    fn file_device_reads_via_pread() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(&patterned(4096)).expect("write");
        file.flush().expect("flush");

        let dev = FileByteDevice::open(file.path()).expect("open");
        assert_eq!(dev.len_bytes(), 4096);

        let reader = BlockReader::new(dev, BlockSize::new(1024).unwrap());
        let block = reader.read_block(BlockNumber(2)).expect("block 2");
        assert!(block.as_slice().iter().all(|b| *b == 2));
        assert!(reader.read_block(BlockNumber(4)).is_err());
    }

    #[test]
    fn file_device_open_failure_is_image_unreadable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.img");
        let err = FileByteDevice::open(&missing).unwrap_err();
        assert!(matches!(err, E2sError::ImageUnreadable { .. }), "{err:?}");
        assert_eq!(err.exit_code(), 1);
    }
}
