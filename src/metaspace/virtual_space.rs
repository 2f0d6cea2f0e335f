use crate::gc::Safepoint;
use crate::metaspace::chunk::{Metachunk, OVERHEAD_WORDS};
use crate::util::address::{Address, WordSize};
use crate::util::conversions;
use crate::util::memory;
use crate::util::options::Options;
use spin::Mutex;

/// One contiguous reservation obtained from the OS. Chunks are carved from
/// it with a monotone cursor; carved space is only reclaimed by purging the
/// whole node once every chunk cut from it has been returned.
struct VirtualSpaceNode {
    start: Address,
    cursor: Address,
    end: Address,
    /// Words of carved chunks currently checked out to arenas or sitting in
    /// a free list. Zero means every carved chunk has been handed back and
    /// returned to this node's accounting.
    live_words: WordSize,
}

impl VirtualSpaceNode {
    fn map(word_size: WordSize) -> std::io::Result<VirtualSpaceNode> {
        let bytes = conversions::page_align_up(conversions::words_to_bytes(word_size));
        let start = memory::mmap_anon(bytes)?;
        debug!("mapped virtual space node [{}, {})", start, start + bytes);
        Ok(VirtualSpaceNode {
            start,
            cursor: start,
            end: start + bytes,
            live_words: 0,
        })
    }

    fn free_words(&self) -> WordSize {
        conversions::words_between(self.cursor, self.end)
    }

    fn has_carved(&self) -> bool {
        self.cursor > self.start
    }

    /// Carves `word_size` words off the cursor. The node never serves an
    /// allocation smaller than a whole chunk.
    fn carve(&mut self, word_size: WordSize) -> Option<Address> {
        if self.free_words() < word_size {
            return None;
        }
        let bottom = self.cursor;
        self.cursor = self.cursor.add_words(word_size);
        Some(bottom)
    }

    fn reserved_words(&self) -> WordSize {
        conversions::words_between(self.start, self.end)
    }
}

impl Drop for VirtualSpaceNode {
    fn drop(&mut self) {
        let bytes = self.end - self.start;
        if let Err(e) = memory::munmap(self.start, bytes) {
            warn!("failed to unmap virtual space node at {}: {}", self.start, e);
        }
    }
}

struct VirtualSpaceListInner {
    /// Purged slots become `None`; indices stay stable because chunks refer
    /// to their owning node by index.
    nodes: Vec<Option<VirtualSpaceNode>>,
    /// One free list per fixed size class, plus one for humongous chunks.
    free: [Vec<Metachunk>; 3],
    free_humongous: Vec<Metachunk>,
}

/// The process-wide list of reserved virtual-space nodes and free chunks.
/// Shared by every arena; short critical sections under a spin lock.
pub struct VirtualSpaceList {
    inner: Mutex<VirtualSpaceListInner>,
    node_words: WordSize,
    /// The three fixed chunk size classes (specialized, small, medium).
    class_sizes: [WordSize; 3],
}

impl VirtualSpaceList {
    pub fn new(options: &Options) -> VirtualSpaceList {
        let class_sizes = [
            options.specialized_chunk_words,
            options.small_chunk_words,
            options.medium_chunk_words,
        ];
        debug_assert!(class_sizes[0] > OVERHEAD_WORDS);
        debug_assert!(class_sizes[0] < class_sizes[1] && class_sizes[1] < class_sizes[2]);
        VirtualSpaceList {
            inner: Mutex::new(VirtualSpaceListInner {
                nodes: Vec::new(),
                free: [Vec::new(), Vec::new(), Vec::new()],
                free_humongous: Vec::new(),
            }),
            node_words: options.virtual_space_node_words,
            class_sizes,
        }
    }

    fn class_of(&self, word_size: WordSize) -> Option<usize> {
        self.class_sizes.iter().position(|s| *s == word_size)
    }

    /// Hands out a chunk of exactly `word_size` words (a free-list hit may
    /// return a larger humongous chunk). Returns `None` when the OS refuses
    /// to reserve more address space.
    pub fn get_chunk(&self, word_size: WordSize) -> Option<Metachunk> {
        let mut inner = self.inner.lock();

        // Free list first.
        let reused = match self.class_of(word_size) {
            Some(class) => inner.free[class].pop(),
            None => {
                // Best fit among free humongous chunks.
                let best = inner
                    .free_humongous
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.word_size() >= word_size)
                    .min_by_key(|(_, c)| c.word_size())
                    .map(|(i, _)| i);
                best.map(|i| inner.free_humongous.swap_remove(i))
            }
        };
        if let Some(mut chunk) = reused {
            chunk.reset_for_reuse();
            // Fresh carves are demand-zeroed by the OS; recycled chunks
            // still hold the previous owner's metadata.
            memory::zero(chunk.bottom(), conversions::words_to_bytes(chunk.word_size()));
            if let Some(node) = inner.nodes[chunk.node_index()].as_mut() {
                node.live_words += chunk.word_size();
            }
            trace!("reused free chunk of {} words", chunk.word_size());
            return Some(chunk);
        }

        // Carve from an existing node.
        for (index, slot) in inner.nodes.iter_mut().enumerate() {
            if let Some(node) = slot {
                if let Some(bottom) = node.carve(word_size) {
                    node.live_words += word_size;
                    return Some(Metachunk::new(bottom, word_size, index));
                }
            }
        }

        // Reserve a new node. Humongous requests beyond the node size get a
        // dedicated node.
        let node_words = std::cmp::max(self.node_words, word_size);
        let mut node = match VirtualSpaceNode::map(node_words) {
            Ok(node) => node,
            Err(e) => {
                warn!("virtual space exhausted: cannot reserve {} words: {}", node_words, e);
                return None;
            }
        };
        let bottom = node.carve(word_size).expect("fresh node must fit its first chunk");
        node.live_words += word_size;
        let index = inner.nodes.len();
        inner.nodes.push(Some(node));
        Some(Metachunk::new(bottom, word_size, index))
    }

    /// Takes back chunks discarded wholesale by a dying or retiring arena
    /// and parks them on the free lists.
    pub fn return_chunks(&self, chunks: impl IntoIterator<Item = Metachunk>) {
        let mut inner = self.inner.lock();
        for mut chunk in chunks {
            chunk.reset_for_reuse();
            if let Some(node) = inner.nodes[chunk.node_index()].as_mut() {
                debug_assert!(node.live_words >= chunk.word_size());
                node.live_words -= chunk.word_size();
            }
            match self.class_of(chunk.word_size()) {
                Some(class) => inner.free[class].push(chunk),
                None => inner.free_humongous.push(chunk),
            }
        }
    }

    /// Releases nodes whose carved chunks have all been returned, dropping
    /// the free-list entries that pointed into them and unmapping the
    /// reservation. Safepoint-only: free chunks must not be handed out while
    /// their backing node is being released.
    pub fn purge(&self, _safepoint: &Safepoint) -> usize {
        let mut inner = self.inner.lock();
        let mut released = 0;
        for index in 0..inner.nodes.len() {
            let purgable = matches!(
                &inner.nodes[index],
                Some(node) if node.live_words == 0 && node.has_carved()
            );
            if purgable {
                for list in inner.free.iter_mut() {
                    list.retain(|c| c.node_index() != index);
                }
                inner.free_humongous.retain(|c| c.node_index() != index);
                debug!("purging virtual space node {}", index);
                inner.nodes[index] = None;
                released += 1;
            }
        }
        released
    }

    /// Total reserved words across live nodes.
    pub fn reserved_words(&self) -> WordSize {
        let inner = self.inner.lock();
        inner
            .nodes
            .iter()
            .flatten()
            .map(|n| n.reserved_words())
            .sum()
    }

    /// Number of chunks currently parked on free lists.
    pub fn free_chunk_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.free.iter().map(Vec::len).sum::<usize>() + inner.free_humongous.len()
    }

    pub(crate) fn node_count(&self) -> usize {
        self.inner.lock().nodes.iter().flatten().count()
    }
}
