use crate::gc::Safepoint;
use crate::intern::{StringTable, SymbolTable};
use crate::loader::ClassLoaderDataGraph;
use crate::metaspace::{ChunkGrowthPolicy, MetaspaceGC, VirtualSpaceList};
use crate::util::options::Options;
use crate::util::{ObjectReference, WordSize};
use std::sync::Arc;

/// What a full-collection epilogue reclaimed and resized, for pause logging.
#[derive(Clone, Copy, Debug, Default)]
pub struct GcEpilogueStats {
    pub loaders_unloaded: usize,
    pub nodes_purged: usize,
    pub symbols_unlinked: usize,
    pub strings_unlinked: usize,
    pub symbol_table_rehashed: bool,
    pub string_table_rehashed: bool,
    /// The high-water mark after resizing, in words.
    pub new_capacity_words: WordSize,
}

/// The explicitly constructed root of all metaspace state: the shared
/// virtual-space list and trigger policy, the class-loader data graph, and
/// the two intern tables. An embedding runtime builds one of these at
/// startup and threads it to wherever metadata or interning is needed.
pub struct MetaspaceRuntime {
    options: Options,
    vs_list: Arc<VirtualSpaceList>,
    metaspace_gc: Arc<MetaspaceGC>,
    loader_graph: ClassLoaderDataGraph,
    symbol_table: SymbolTable,
    string_table: StringTable,
}

impl MetaspaceRuntime {
    /// Builds a runtime from `METASPACE_*` environment options.
    pub fn new() -> MetaspaceRuntime {
        MetaspaceRuntime::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> MetaspaceRuntime {
        // Ignored if the embedder set its own logger.
        crate::util::logger::try_init().ok();
        let vs_list = Arc::new(VirtualSpaceList::new(&options));
        let metaspace_gc = Arc::new(MetaspaceGC::new(&options));
        let loader_graph = ClassLoaderDataGraph::new(
            Arc::clone(&vs_list),
            Arc::clone(&metaspace_gc),
            ChunkGrowthPolicy::from_options(&options),
        );
        let symbol_table =
            SymbolTable::new(options.symbol_table_size, options.rehash_chain_threshold);
        let string_table =
            StringTable::new(options.string_table_size, options.rehash_chain_threshold);
        info!(
            "metaspace runtime up: initial high-water mark {} words, ceiling {} words",
            metaspace_gc.capacity_until_gc(),
            options.max_metaspace_size / crate::util::constants::BYTES_IN_WORD
        );
        MetaspaceRuntime {
            options,
            vs_list,
            metaspace_gc,
            loader_graph,
            symbol_table,
            string_table,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn loader_graph(&self) -> &ClassLoaderDataGraph {
        &self.loader_graph
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    pub fn string_table(&self) -> &StringTable {
        &self.string_table
    }

    pub fn metaspace_gc(&self) -> &MetaspaceGC {
        &self.metaspace_gc
    }

    /// A mark/adjust context for one collection cycle, sized from the
    /// configured preserved-marks capacity.
    pub fn mark_sweep<'a, M: crate::gc::ObjectModel>(&self, model: &'a M) -> crate::gc::MarkSweep<'a, M> {
        crate::gc::MarkSweep::new(model, self.options.preserved_marks_capacity)
    }

    /// Whether a metadata allocation refusal has requested a collection.
    pub fn gc_requested(&self) -> bool {
        self.metaspace_gc.state() == crate::metaspace::TriggerState::ExpandRequested
    }

    /// Called by the GC driver when a full collection begins: latches the
    /// trigger state and resets loader claim flags for the trace.
    pub fn full_gc_prologue(&self, safepoint: &Safepoint) {
        self.metaspace_gc.on_gc_start(safepoint);
        self.loader_graph.clear_claims(safepoint);
    }

    /// Called by the GC driver after marking (and any compaction) of a full
    /// collection: marks dead class loaders as unloading, purges them along
    /// with emptied virtual-space nodes, unlinks dead table entries,
    /// performs any pending seeded rehash, and resizes the high-water mark.
    ///
    /// `is_loader_alive` and `is_string_alive` are the collector's liveness
    /// verdicts for heap objects, already adjusted for any moves.
    pub fn full_gc_epilogue(
        &self,
        safepoint: &Safepoint,
        is_loader_alive: &mut dyn FnMut(ObjectReference) -> bool,
        is_string_alive: &mut dyn FnMut(ObjectReference) -> bool,
    ) -> GcEpilogueStats {
        let loaders_unloaded = self.loader_graph.unload_dead(safepoint, is_loader_alive);
        let nodes_purged = self.loader_graph.purge(safepoint);
        let symbols_unlinked = self.symbol_table.unlink(safepoint);
        let strings_unlinked = self.string_table.unlink(safepoint, is_string_alive);
        let symbol_table_rehashed = self.symbol_table.rehash_if_needed(safepoint);
        let string_table_rehashed = self.string_table.rehash_if_needed(safepoint);
        let new_capacity_words = self.metaspace_gc.compute_new_size(safepoint);
        let stats = GcEpilogueStats {
            loaders_unloaded,
            nodes_purged,
            symbols_unlinked,
            strings_unlinked,
            symbol_table_rehashed,
            string_table_rehashed,
            new_capacity_words,
        };
        info!(
            "full gc epilogue: {} loaders unloaded, {} nodes purged, {} symbols and {} strings unlinked, high-water mark {} words",
            stats.loaders_unloaded,
            stats.nodes_purged,
            stats.symbols_unlinked,
            stats.strings_unlinked,
            stats.new_capacity_words
        );
        stats
    }

    /// Consistency checks over the intern tables, for debugging pauses.
    pub fn verify(&self) {
        self.symbol_table.verify();
        self.string_table.verify();
    }

    /// Logs a human-readable summary of metaspace occupancy and table
    /// shape. Walks the loader graph; intended for diagnostics, not hot
    /// paths.
    pub fn dump(&self) {
        info!(
            "metaspace: {} loaders, {} words used / {} capacity, {} committed, mark at {}",
            self.loader_graph.loader_count(),
            self.loader_graph.used_words_slow(),
            self.loader_graph.capacity_words_slow(),
            self.metaspace_gc.committed_words(),
            self.metaspace_gc.capacity_until_gc()
        );
        let (symbol_chain, symbols) = self.symbol_table.chain_stats();
        let (string_chain, strings) = self.string_table.chain_stats();
        info!(
            "symbol table: {} entries, longest chain {}; string table: {} entries, longest chain {}",
            symbols, symbol_chain, strings, string_chain
        );
    }
}

impl Default for MetaspaceRuntime {
    fn default() -> Self {
        MetaspaceRuntime::new()
    }
}
