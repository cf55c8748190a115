//! Allocation bitmap decoding.
//!
//! ext2 bitmaps are one block long; bit `i` of byte `j` (least significant
//! bit first) describes object `j * 8 + i` of the group. A set bit means
//! allocated.

/// Get bit `idx` from a bitmap byte slice. Bits past the slice read as set.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    match bitmap.get(byte_idx) {
        Some(byte) => (byte >> bit_idx) & 1 == 1,
        None => true,
    }
}

/// Count free (zero) bits in the first `count` bits of `bitmap`.
#[must_use]
pub fn bitmap_count_free(bitmap: &[u8], count: u32) -> u32 {
    iter_free_bits(bitmap, count).fold(0, |n, _| n + 1)
}

/// Iterate the indices of zero bits among the first `count` bits, ascending.
///
/// Bits beyond `count` are padding and never yielded, nor are bits past the
/// end of `bitmap`.
#[must_use]
pub fn iter_free_bits(bitmap: &[u8], count: u32) -> FreeBits<'_> {
    let available = u32::try_from(bitmap.len())
        .unwrap_or(u32::MAX)
        .saturating_mul(8);
    FreeBits {
        bitmap,
        limit: count.min(available),
        next: 0,
    }
}

/// Iterator over free bit indices; see [`iter_free_bits`].
#[derive(Debug, Clone)]
pub struct FreeBits<'a> {
    bitmap: &'a [u8],
    limit: u32,
    next: u32,
}

impl Iterator for FreeBits<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.next < self.limit {
            let idx = self.next;
            // Fully allocated bytes are skipped whole.
            if idx % 8 == 0 && self.bitmap[(idx / 8) as usize] == 0xFF {
                self.next = idx.saturating_add(8);
                continue;
            }
            self.next += 1;
            if !bitmap_get(self.bitmap, idx) {
                return Some(idx);
            }
        }
        None
    }
}
