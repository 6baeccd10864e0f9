//! Region layout constants.
//!
//! A region is a fixed-size block: a 4 KiB header (metadata record plus the
//! cell bitmap) followed by a 252 KiB payload addressed at byte granularity.
//! The payload is divided into pointer-sized cells for bitmap bookkeeping.
//!
//! The total region size is kept a small multiple of the host page size so
//! regions pack cleanly into virtual memory.

/// Width of a payload cell in bytes (one machine pointer).
pub const CELL_BYTES: usize = 8;

/// Total size of a region in bytes, header included.
pub const REGION_BYTES: usize = 256 * 1024;

/// Size of the region header (metadata record + cell bitmap, padded).
pub const REGION_HEADER_BYTES: usize = 4 * 1024;

/// Size of the region payload in bytes.
pub const REGION_PAYLOAD_BYTES: usize = REGION_BYTES - REGION_HEADER_BYTES;

/// Number of cells in a region payload.
pub const CELL_COUNT: usize = REGION_PAYLOAD_BYTES / CELL_BYTES;

/// Size of the metadata record at the head of the region header.
pub const REGION_META_BYTES: usize = 64;

/// Number of 64-bit words in the cell bitmap.
pub(crate) const BITMAP_WORDS: usize = CELL_COUNT / 64;

// The bitmap must cover every cell with no slack, and the metadata record
// plus the bitmap must fill the header exactly.
const _: () = assert!(CELL_COUNT % 64 == 0);
const _: () = assert!(REGION_META_BYTES + BITMAP_WORDS * 8 == REGION_HEADER_BYTES);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_constants() {
        assert_eq!(CELL_BYTES, 8);
        assert_eq!(CELL_COUNT, 32256);
        assert_eq!(REGION_PAYLOAD_BYTES, 258048);
        assert_eq!(REGION_PAYLOAD_BYTES, CELL_COUNT * CELL_BYTES);
        assert_eq!(REGION_HEADER_BYTES + REGION_PAYLOAD_BYTES, REGION_BYTES);
    }

    #[test]
    fn test_region_is_page_multiple() {
        // 4 KiB pages are the smallest page size on supported targets.
        assert_eq!(REGION_BYTES % 4096, 0);
    }
}
