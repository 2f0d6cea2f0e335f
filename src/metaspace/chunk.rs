use crate::util::address::{Address, WordSize};
use crate::util::conversions;

/// Words at the bottom of every chunk reserved for chunk bookkeeping. The
/// payload cursor starts above them, so a chunk of `word_size` N serves at
/// most `N - OVERHEAD_WORDS` words of metadata.
pub const OVERHEAD_WORDS: WordSize = 4;

/// A contiguous bump-allocated region of metaspace, carved from a reserved
/// virtual-space node. `bottom <= top <= end` always holds and `top` only
/// moves forward; an individual allocation is never unwound, the chunk is
/// recycled as a whole unit.
///
/// A chunk has no internal locking. The owning arena serializes access; a
/// free chunk is owned by the virtual-space list's free lists. Ownership is
/// transferred by value, never shared.
#[derive(Debug)]
pub struct Metachunk {
    word_size: WordSize,
    bottom: Address,
    top: Address,
    end: Address,
    /// Index of the owning virtual-space node, for purge accounting.
    node: usize,
}

impl Metachunk {
    /// Wraps `word_size` words of already-reserved memory starting at
    /// `bottom`. Does not touch the OS.
    pub(crate) fn new(bottom: Address, word_size: WordSize, node: usize) -> Metachunk {
        debug_assert!(word_size > OVERHEAD_WORDS);
        let chunk = Metachunk {
            word_size,
            bottom,
            top: bottom.add_words(OVERHEAD_WORDS),
            end: bottom.add_words(word_size),
            node,
        };
        trace!(
            "new metachunk [{}, {}) of {} words on node {}",
            chunk.bottom,
            chunk.end,
            word_size,
            node
        );
        chunk
    }

    /// Bump-allocates `word_size` words. Returns the start of the carved
    /// region, or `None` if the chunk has fewer free words than requested.
    pub fn allocate(&mut self, word_size: WordSize) -> Option<Address> {
        if self.free_words() < word_size {
            return None;
        }
        let result = self.top;
        self.top = self.top.add_words(word_size);
        debug_assert!(self.top <= self.end);
        Some(result)
    }

    pub fn word_size(&self) -> WordSize {
        self.word_size
    }

    pub fn bottom(&self) -> Address {
        self.bottom
    }

    pub fn top(&self) -> Address {
        self.top
    }

    pub fn end(&self) -> Address {
        self.end
    }

    /// Words consumed so far, bookkeeping overhead included.
    pub fn used_words(&self) -> WordSize {
        conversions::words_between(self.bottom, self.top)
    }

    /// Words still available for allocation.
    pub fn free_words(&self) -> WordSize {
        conversions::words_between(self.top, self.end)
    }

    /// Has nothing beyond the overhead been allocated?
    pub fn is_empty(&self) -> bool {
        self.used_words() == OVERHEAD_WORDS
    }

    pub(crate) fn node_index(&self) -> usize {
        self.node
    }

    /// Rewinds the cursor for reuse from a free list. Only legal once the
    /// previous owner has discarded the chunk wholesale.
    pub(crate) fn reset_for_reuse(&mut self) {
        self.top = self.bottom.add_words(OVERHEAD_WORDS);
    }

    pub(crate) fn contains(&self, addr: Address) -> bool {
        self.bottom <= addr && addr < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_WORD;

    fn backing(words: usize) -> (Vec<usize>, Address) {
        let buf = vec![0usize; words];
        let addr = Address::from_ptr(buf.as_ptr());
        (buf, addr)
    }

    #[test]
    fn bump_is_monotonic() {
        let (_buf, bottom) = backing(100);
        let mut chunk = Metachunk::new(bottom, 100, 0);
        let mut prev_top = chunk.top();
        for _ in 0..8 {
            let got = chunk.allocate(10).unwrap();
            assert_eq!(got, prev_top);
            assert_eq!(chunk.top(), prev_top.add_words(10));
            prev_top = chunk.top();
        }
        assert!(chunk.bottom() <= chunk.top() && chunk.top() <= chunk.end());
    }

    #[test]
    fn overhead_scenario() {
        // A 100-word chunk with 4 words of overhead: allocate(50) succeeds
        // and leaves 46 free words, so a second allocate(50) must fail.
        let (_buf, bottom) = backing(100);
        let mut chunk = Metachunk::new(bottom, 100, 0);
        assert_eq!(chunk.free_words(), 96);
        let a = chunk.allocate(50).unwrap();
        assert_eq!(a, bottom.add_words(OVERHEAD_WORDS));
        assert_eq!(chunk.top(), bottom.add_words(OVERHEAD_WORDS + 50));
        assert_eq!(chunk.free_words(), 46);
        assert_eq!(chunk.allocate(50), None);
        // A failed allocation does not move the cursor.
        assert_eq!(chunk.free_words(), 46);
        assert_eq!(chunk.allocate(46), Some(bottom.add_words(OVERHEAD_WORDS + 50)));
        assert_eq!(chunk.free_words(), 0);
    }

    #[test]
    fn reuse_rewinds_cursor() {
        let (_buf, bottom) = backing(64);
        let mut chunk = Metachunk::new(bottom, 64, 0);
        assert!(chunk.is_empty());
        chunk.allocate(8).unwrap();
        assert!(!chunk.is_empty());
        chunk.reset_for_reuse();
        assert!(chunk.is_empty());
        assert_eq!(chunk.free_words(), 64 - OVERHEAD_WORDS);
    }

    #[test]
    fn contains_is_half_open() {
        let (_buf, bottom) = backing(16);
        let chunk = Metachunk::new(bottom, 16, 0);
        assert!(chunk.contains(bottom));
        assert!(chunk.contains(bottom + (15 * BYTES_IN_WORD)));
        assert!(!chunk.contains(bottom.add_words(16)));
    }
}
