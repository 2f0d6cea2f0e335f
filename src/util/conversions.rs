use crate::util::address::{Address, ByteSize, WordSize};
use crate::util::constants::*;

/// Aligns up a raw value to the given alignment (a power of two).
pub const fn raw_align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Aligns down a raw value to the given alignment (a power of two).
pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !(align - 1)
}

/// Is the raw value aligned to the given alignment?
pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & (align - 1) == 0
}

/// Converts a word count to a byte count.
pub const fn words_to_bytes(words: WordSize) -> ByteSize {
    words << LOG_BYTES_IN_WORD
}

/// Converts a byte count to a word count, rounding up.
pub const fn bytes_to_words_up(bytes: ByteSize) -> WordSize {
    raw_align_up(bytes, BYTES_IN_WORD) >> LOG_BYTES_IN_WORD
}

/// Converts a byte count to a word count. The size must be word aligned.
pub fn bytes_to_words(bytes: ByteSize) -> WordSize {
    debug_assert!(raw_is_aligned(bytes, BYTES_IN_WORD));
    bytes >> LOG_BYTES_IN_WORD
}

/// Converts a byte count to a page count, rounding up.
pub const fn bytes_to_pages_up(bytes: ByteSize) -> usize {
    raw_align_up(bytes, BYTES_IN_PAGE) >> LOG_BYTES_IN_PAGE
}

/// Aligns a byte size up to a whole number of pages.
pub const fn page_align_up(bytes: ByteSize) -> ByteSize {
    raw_align_up(bytes, BYTES_IN_PAGE)
}

/// Number of whole words between two addresses. `start` must not be above
/// `end` and both must be word aligned.
pub fn words_between(start: Address, end: Address) -> WordSize {
    debug_assert!(start.is_aligned_to(BYTES_IN_WORD));
    debug_assert!(end.is_aligned_to(BYTES_IN_WORD));
    bytes_to_words(end - start)
}
