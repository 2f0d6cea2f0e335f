use crate::metaspace::chunk::{Metachunk, OVERHEAD_WORDS};
use crate::metaspace::gc_trigger::MetaspaceGC;
use crate::metaspace::virtual_space::VirtualSpaceList;
use crate::metaspace::{AllocError, MetadataType};
use crate::util::address::{Address, WordSize};
use crate::util::options::Options;
use std::sync::Arc;

/// The chunk-size schedule for an arena: geometric growth from a
/// specialized first chunk through small chunks to medium chunks, with
/// humongous chunks cut to measure for oversize requests. The schedule is a
/// tunable heuristic; only monotonic capacity growth is contractual.
#[derive(Clone, Copy, Debug)]
pub struct ChunkGrowthPolicy {
    specialized_words: WordSize,
    small_words: WordSize,
    medium_words: WordSize,
    promote_after: usize,
}

impl ChunkGrowthPolicy {
    pub fn from_options(options: &Options) -> ChunkGrowthPolicy {
        ChunkGrowthPolicy {
            specialized_words: options.specialized_chunk_words,
            small_words: options.small_chunk_words,
            medium_words: options.medium_chunk_words,
            promote_after: options.small_chunks_per_arena,
        }
    }

    /// Picks the word size of the next chunk for an arena that has already
    /// consumed `chunks_allocated` chunks in this stream and now needs
    /// `payload_words` of metadata.
    fn chunk_words(&self, chunks_allocated: usize, payload_words: WordSize) -> WordSize {
        let required = payload_words + OVERHEAD_WORDS;
        if required > self.medium_words {
            // Humongous: cut to measure.
            return required;
        }
        let scheduled = if chunks_allocated == 0 {
            self.specialized_words
        } else if chunks_allocated <= self.promote_after {
            self.small_words
        } else {
            self.medium_words
        };
        if required <= scheduled {
            scheduled
        } else if required <= self.small_words {
            self.small_words
        } else {
            self.medium_words
        }
    }
}

/// A per-class-loader metadata arena. Two independent allocation streams
/// (ordinary metadata and class space) each hold one current chunk; filled
/// chunks are retired in place and the whole set is discarded wholesale when
/// the owning class loader is unloaded.
///
/// Not internally locked: the owning `ClassLoaderData` serializes access.
pub struct Metaspace {
    vs_list: Arc<VirtualSpaceList>,
    gc: Arc<MetaspaceGC>,
    policy: ChunkGrowthPolicy,
    current: [Option<Metachunk>; MetadataType::COUNT],
    retired: Vec<Metachunk>,
    chunks_allocated: [usize; MetadataType::COUNT],
    used_words: [WordSize; MetadataType::COUNT],
    capacity_words: WordSize,
}

impl Metaspace {
    pub fn new(
        vs_list: Arc<VirtualSpaceList>,
        gc: Arc<MetaspaceGC>,
        policy: ChunkGrowthPolicy,
    ) -> Metaspace {
        Metaspace {
            vs_list,
            gc,
            policy,
            current: [None, None],
            retired: Vec::new(),
            chunks_allocated: [0; MetadataType::COUNT],
            used_words: [0; MetadataType::COUNT],
            capacity_words: 0,
        }
    }

    /// Allocates `word_size` words of metadata. A high-water-mark refusal
    /// surfaces as [`AllocError::GcPressure`]; the caller runs a collection
    /// and retries through [`allocate_after_gc`](Metaspace::allocate_after_gc).
    pub fn allocate(
        &mut self,
        word_size: WordSize,
        mdtype: MetadataType,
    ) -> Result<Address, AllocError> {
        debug_assert!(word_size > 0);
        if let Some(addr) = self.allocate_fast(word_size, mdtype) {
            return Ok(addr);
        }
        self.allocate_slow(word_size, mdtype, false)
    }

    /// The retry path, called after the caller has offered the collector a
    /// chance to reclaim metadata. May raise the high-water mark up to the
    /// hard ceiling; failure here is a real out-of-memory for the request.
    pub fn allocate_after_gc(
        &mut self,
        word_size: WordSize,
        mdtype: MetadataType,
    ) -> Result<Address, AllocError> {
        debug_assert!(word_size > 0);
        if let Some(addr) = self.allocate_fast(word_size, mdtype) {
            return Ok(addr);
        }
        self.allocate_slow(word_size, mdtype, true)
    }

    fn allocate_fast(&mut self, word_size: WordSize, mdtype: MetadataType) -> Option<Address> {
        let index = mdtype.index();
        let addr = self.current[index].as_mut()?.allocate(word_size)?;
        self.used_words[index] += word_size;
        Some(addr)
    }

    fn allocate_slow(
        &mut self,
        word_size: WordSize,
        mdtype: MetadataType,
        expand: bool,
    ) -> Result<Address, AllocError> {
        let index = mdtype.index();
        let chunk_words = self.policy.chunk_words(self.chunks_allocated[index], word_size);

        let mut chunk = match self.vs_list.get_chunk(chunk_words) {
            Some(chunk) => chunk,
            None => return Err(AllocError::OutOfMemory { word_size, mdtype }),
        };
        // A humongous free-list hit may be larger than requested; commit
        // what we actually hold.
        let actual_words = chunk.word_size();
        let committed = if expand {
            self.gc.expand_and_commit(actual_words)
        } else {
            self.gc.try_commit(actual_words)
        };
        if !committed {
            self.vs_list.return_chunks(Some(chunk));
            return Err(if expand {
                AllocError::OutOfMemory { word_size, mdtype }
            } else {
                AllocError::GcPressure { word_size, mdtype }
            });
        }

        let addr = match chunk.allocate(word_size) {
            Some(addr) => addr,
            // The policy sized the chunk to fit; anything else is corruption.
            None => panic!(
                "fresh {}-word chunk cannot satisfy {}-word allocation",
                actual_words, word_size
            ),
        };
        trace!(
            "arena acquired {}-word {} chunk (request {} words)",
            actual_words,
            mdtype,
            word_size
        );

        if let Some(old) = self.current[index].replace(chunk) {
            self.retired.push(old);
        }
        self.chunks_allocated[index] += 1;
        self.capacity_words += actual_words;
        self.used_words[index] += word_size;
        Ok(addr)
    }

    /// Words handed out to callers, across both streams.
    pub fn used_words(&self) -> WordSize {
        self.used_words.iter().sum()
    }

    pub fn used_words_of(&self, mdtype: MetadataType) -> WordSize {
        self.used_words[mdtype.index()]
    }

    /// Words of chunk capacity owned by this arena, overhead included.
    pub fn capacity_words(&self) -> WordSize {
        self.capacity_words
    }

    /// Words still free in the current chunks. O(1).
    pub fn free_words(&self) -> WordSize {
        self.current
            .iter()
            .flatten()
            .map(Metachunk::free_words)
            .sum()
    }

    /// Does this arena own the chunk containing `addr`?
    pub fn contains(&self, addr: Address) -> bool {
        self.current
            .iter()
            .flatten()
            .chain(self.retired.iter())
            .any(|c| c.contains(addr))
    }
}

impl Drop for Metaspace {
    /// Wholesale deallocation: every chunk goes back to the free lists and
    /// the committed capacity is released in one step.
    fn drop(&mut self) {
        let chunks: Vec<Metachunk> = self
            .current
            .iter_mut()
            .filter_map(Option::take)
            .chain(self.retired.drain(..))
            .collect();
        debug!(
            "dropping arena: {} chunks, {} capacity words returned",
            chunks.len(),
            self.capacity_words
        );
        self.vs_list.return_chunks(chunks);
        self.gc.uncommit(self.capacity_words);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_WORD;

    fn small_options() -> Options {
        let mut options = Options::default();
        options.virtual_space_node_words = 8192;
        options.specialized_chunk_words = 16;
        options.small_chunk_words = 64;
        options.medium_chunk_words = 256;
        options.small_chunks_per_arena = 2;
        options
    }

    fn arena_with(options: &Options) -> (Metaspace, Arc<VirtualSpaceList>, Arc<MetaspaceGC>) {
        let vs_list = Arc::new(VirtualSpaceList::new(options));
        let gc = Arc::new(MetaspaceGC::new(options));
        let arena = Metaspace::new(
            vs_list.clone(),
            gc.clone(),
            ChunkGrowthPolicy::from_options(options),
        );
        (arena, vs_list, gc)
    }

    #[test]
    fn capacity_grows_monotonically() {
        let options = small_options();
        let (mut arena, _vs, _gc) = arena_with(&options);
        let mut last_capacity = 0;
        for _ in 0..200 {
            arena.allocate(5, MetadataType::NonClass).unwrap();
            assert!(arena.capacity_words() >= last_capacity);
            last_capacity = arena.capacity_words();
        }
        assert_eq!(arena.used_words(), 200 * 5);
        assert!(arena.capacity_words() >= arena.used_words());
    }

    #[test]
    fn streams_are_independent() {
        let options = small_options();
        let (mut arena, _vs, _gc) = arena_with(&options);
        let a = arena.allocate(4, MetadataType::NonClass).unwrap();
        let b = arena.allocate(4, MetadataType::Class).unwrap();
        // Two current chunks, one per stream.
        assert_ne!(a, b);
        assert_eq!(arena.used_words_of(MetadataType::NonClass), 4);
        assert_eq!(arena.used_words_of(MetadataType::Class), 4);
        assert_eq!(arena.capacity_words(), 2 * options.specialized_chunk_words);
    }

    #[test]
    fn oversize_requests_get_humongous_chunks() {
        let options = small_options();
        let (mut arena, _vs, _gc) = arena_with(&options);
        let big = options.medium_chunk_words * 2;
        arena.allocate(big, MetadataType::NonClass).unwrap();
        assert_eq!(arena.capacity_words(), big + OVERHEAD_WORDS);
    }

    #[test]
    fn pressure_then_retry_after_gc() {
        let mut options = small_options();
        // Room for the first specialized chunk only.
        options.metaspace_size = 24 * BYTES_IN_WORD;
        let (mut arena, _vs, gc) = arena_with(&options);

        arena.allocate(8, MetadataType::NonClass).unwrap();
        // The next chunk would cross the high-water mark.
        let err = arena.allocate(32, MetadataType::NonClass).unwrap_err();
        assert_eq!(
            err,
            AllocError::GcPressure {
                word_size: 32,
                mdtype: MetadataType::NonClass
            }
        );
        // Retrying after the (hypothetical) collection expands instead.
        arena.allocate_after_gc(32, MetadataType::NonClass).unwrap();
        assert!(gc.capacity_until_gc() >= gc.committed_words());
    }

    #[test]
    fn hard_ceiling_is_out_of_memory() {
        let mut options = small_options();
        options.metaspace_size = 24 * BYTES_IN_WORD;
        options.max_metaspace_size = 24 * BYTES_IN_WORD;
        let (mut arena, _vs, _gc) = arena_with(&options);

        arena.allocate(8, MetadataType::NonClass).unwrap();
        let err = arena
            .allocate_after_gc(64, MetadataType::NonClass)
            .unwrap_err();
        assert!(matches!(err, AllocError::OutOfMemory { .. }));
    }

    #[test]
    fn drop_returns_everything() {
        let options = small_options();
        let (mut arena, vs_list, gc) = arena_with(&options);
        for _ in 0..100 {
            arena.allocate(7, MetadataType::NonClass).unwrap();
        }
        assert!(gc.committed_words() > 0);
        let chunks = arena.chunks_allocated[MetadataType::NonClass.index()];
        drop(arena);
        assert_eq!(gc.committed_words(), 0);
        assert_eq!(vs_list.free_chunk_count(), chunks);
    }
}
