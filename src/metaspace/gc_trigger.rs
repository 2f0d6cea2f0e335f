use crate::gc::Safepoint;
use crate::util::address::WordSize;
use crate::util::constants::BYTES_IN_WORD;
use crate::util::options::Options;
use atomic::{Atomic, Ordering};
use bytemuck::NoUninit;
use std::sync::atomic::AtomicUsize;

/// Phases of the metaspace trigger policy. `ExpandRequested` means an
/// allocation has hit the high-water mark and the next full collection (or
/// an explicit expand grant) is owed before committed capacity may grow.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, NoUninit)]
pub enum TriggerState {
    Normal,
    ExpandRequested,
    CollectionInProgress,
}

/// Process-wide high-water-mark policy for committed metaspace capacity.
///
/// Arenas commit chunk capacity through [`try_commit`](MetaspaceGC::try_commit);
/// a commit that would cross `capacity_until_gc` is refused, which surfaces
/// to the class-loading caller as a request to collect and retry. After the
/// collection, [`compute_new_size`](MetaspaceGC::compute_new_size) re-aims
/// the mark at the post-collection live size plus headroom: it grows when
/// little was reclaimed (avoiding collect-allocate thrashing) and shrinks
/// cautiously, a bounded step per cycle.
pub struct MetaspaceGC {
    /// Committed metaspace words across all arenas.
    committed_words: AtomicUsize,
    /// The high-water mark: committed capacity may not pass this without a
    /// collection having been offered.
    capacity_until_gc: AtomicUsize,
    /// Floor for the high-water mark (the configured initial size).
    min_words: WordSize,
    /// Hard ceiling for expansion.
    max_words: WordSize,
    min_free_ratio: usize,
    max_free_ratio: usize,
    state: Atomic<TriggerState>,
}

/// Largest fraction of the current mark a single shrink step may remove.
const MAX_SHRINK_FRACTION: usize = 10;

impl MetaspaceGC {
    pub fn new(options: &Options) -> MetaspaceGC {
        let min_words = options.metaspace_size / BYTES_IN_WORD;
        let max_words = options.max_metaspace_size / BYTES_IN_WORD;
        debug_assert!(min_words <= max_words);
        MetaspaceGC {
            committed_words: AtomicUsize::new(0),
            capacity_until_gc: AtomicUsize::new(min_words),
            min_words,
            max_words,
            min_free_ratio: options.min_metaspace_free_ratio,
            max_free_ratio: options.max_metaspace_free_ratio,
            state: Atomic::new(TriggerState::Normal),
        }
    }

    pub fn committed_words(&self) -> WordSize {
        self.committed_words.load(Ordering::Relaxed)
    }

    pub fn capacity_until_gc(&self) -> WordSize {
        self.capacity_until_gc.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> TriggerState {
        self.state.load(Ordering::Relaxed)
    }

    /// Would committing `words` more stay under the high-water mark?
    /// Advisory only; [`try_commit`](MetaspaceGC::try_commit) is the
    /// race-free gate.
    pub fn allows(&self, words: WordSize) -> bool {
        self.committed_words() + words <= self.capacity_until_gc()
    }

    /// Atomically commits `words` of new capacity, refusing to cross the
    /// high-water mark. On refusal the policy moves to `ExpandRequested`.
    pub fn try_commit(&self, words: WordSize) -> bool {
        let limit = self.capacity_until_gc();
        let committed = self
            .committed_words
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                if cur + words <= limit {
                    Some(cur + words)
                } else {
                    None
                }
            });
        match committed {
            Ok(_) => true,
            Err(cur) => {
                let _ = self.state.compare_exchange(
                    TriggerState::Normal,
                    TriggerState::ExpandRequested,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
                debug!(
                    "metaspace HWM hit: committed {} + {} > capacity_until_gc {}",
                    cur, words, limit
                );
                false
            }
        }
    }

    /// Commits `words`, raising the high-water mark past it if necessary and
    /// permitted by the hard ceiling. Used on the retry path after a
    /// collection has already been offered.
    pub fn expand_and_commit(&self, words: WordSize) -> bool {
        loop {
            if self.try_commit(words) {
                // The grant satisfied the expand request.
                let _ = self.state.compare_exchange(
                    TriggerState::ExpandRequested,
                    TriggerState::Normal,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                );
                return true;
            }
            let current = self.capacity_until_gc();
            let needed = self.committed_words() + words;
            if needed > self.max_words {
                return false;
            }
            if self
                .capacity_until_gc
                .compare_exchange(current, std::cmp::max(current, needed), Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                info!(
                    "expanding metaspace capacity_until_gc {} -> {} words",
                    current,
                    std::cmp::max(current, needed)
                );
            }
        }
    }

    /// Releases committed capacity (arena died or returned chunks).
    pub fn uncommit(&self, words: WordSize) {
        let prev = self.committed_words.fetch_sub(words, Ordering::Relaxed);
        debug_assert!(prev >= words);
    }

    /// Marks the start of a full collection undertaken on this policy's
    /// behalf.
    pub fn on_gc_start(&self, _safepoint: &Safepoint) {
        self.state.store(TriggerState::CollectionInProgress, Ordering::Relaxed);
    }

    /// Recomputes the high-water mark from post-collection occupancy.
    /// Returns the new mark.
    pub fn compute_new_size(&self, _safepoint: &Safepoint) -> WordSize {
        let used = self.committed_words();
        let current = self.capacity_until_gc();

        // Capacity below which less than min_free_ratio percent is free.
        let minimum_desired = std::cmp::max(used * 100 / (100 - self.min_free_ratio), self.min_words);
        // Capacity above which more than max_free_ratio percent is free.
        let maximum_desired = std::cmp::max(used * 100 / (100 - self.max_free_ratio), self.min_words);

        let new_capacity = if current < minimum_desired {
            // Too little was reclaimed for the current mark: grow so the
            // next cycle does not immediately trigger again.
            std::cmp::min(minimum_desired, self.max_words)
        } else if current > maximum_desired {
            // Plenty reclaimed: shrink, but never by more than a fixed
            // fraction per cycle.
            let excess = current - maximum_desired;
            current - std::cmp::min(excess, current / MAX_SHRINK_FRACTION)
        } else {
            current
        };

        debug!(
            "metaspace compute_new_size: used {} current {} -> {} (desired [{}, {}])",
            used, current, new_capacity, minimum_desired, maximum_desired
        );
        self.capacity_until_gc.store(new_capacity, Ordering::Relaxed);
        self.state.store(TriggerState::Normal, Ordering::Relaxed);
        new_capacity
    }
}
