//! The class-loader data graph: one [`ClassLoaderData`] per loader, each
//! owning the [`Metaspace`] its class metadata lives in, linked into a
//! [`ClassLoaderDataGraph`] the collector walks for roots, unloading and
//! chunk reclamation.

use crate::intern::Symbol;
use crate::gc::Safepoint;
use crate::metaspace::{
    AllocError, ChunkGrowthPolicy, MetadataType, Metaspace, MetaspaceGC, VirtualSpaceList,
};
use crate::util::{Address, ObjectReference, WordSize};
use atomic::{Atomic, Ordering};
use spin::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Class metadata as the loader graph tracks it: the class name and the
/// heap mirror object the collector treats as a root of the loader.
pub struct Klass {
    name: Arc<Symbol>,
    mirror: Atomic<ObjectReference>,
}

impl Klass {
    pub fn new(name: Arc<Symbol>) -> Klass {
        Klass {
            name,
            mirror: Atomic::new(ObjectReference::NULL),
        }
    }

    pub fn name(&self) -> &Arc<Symbol> {
        &self.name
    }

    pub fn mirror(&self) -> ObjectReference {
        self.mirror.load(Ordering::Relaxed)
    }

    pub fn set_mirror(&self, mirror: ObjectReference) {
        self.mirror.store(mirror, Ordering::Relaxed);
    }
}

/// Per-loader metadata state. The metaspace is created lazily on the first
/// metadata allocation and dropped, returning every chunk, when the loader
/// is unloaded.
pub struct ClassLoaderData {
    /// The loader object on the heap. Null for the bootstrap loader, which
    /// is never unloaded.
    loader: Atomic<ObjectReference>,
    is_bootstrap: bool,
    metaspace: Mutex<Option<Metaspace>>,
    klasses: Mutex<Vec<Arc<Klass>>>,
    /// Tracing claim flag. The first tracer to claim a loader walks its
    /// roots; everyone else skips it. Cleared before each cycle.
    claimed: AtomicBool,
    /// Set when GC finds the loader object dead. The data stays linked,
    /// walkable, until the next purge pass frees it.
    unloading: AtomicBool,
    vs_list: Arc<VirtualSpaceList>,
    gc: Arc<MetaspaceGC>,
    policy: ChunkGrowthPolicy,
}

impl ClassLoaderData {
    fn new(
        loader: ObjectReference,
        is_bootstrap: bool,
        vs_list: Arc<VirtualSpaceList>,
        gc: Arc<MetaspaceGC>,
        policy: ChunkGrowthPolicy,
    ) -> ClassLoaderData {
        ClassLoaderData {
            loader: Atomic::new(loader),
            is_bootstrap,
            metaspace: Mutex::new(None),
            klasses: Mutex::new(Vec::new()),
            claimed: AtomicBool::new(false),
            unloading: AtomicBool::new(false),
            vs_list,
            gc,
            policy,
        }
    }

    pub fn loader(&self) -> ObjectReference {
        self.loader.load(Ordering::Relaxed)
    }

    pub fn is_bootstrap(&self) -> bool {
        self.is_bootstrap
    }

    /// Whether GC has condemned this loader. Its metadata remains intact
    /// until the purge pass unlinks it from the graph.
    pub fn is_unloading(&self) -> bool {
        self.unloading.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn set_unloading(&self) {
        self.unloading.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    /// Allocates metadata from this loader's metaspace, creating the
    /// metaspace on first use.
    pub fn allocate_metadata(
        &self,
        word_size: WordSize,
        mdtype: MetadataType,
    ) -> Result<Address, AllocError> {
        let mut guard = self.metaspace.lock();
        guard
            .get_or_insert_with(|| {
                Metaspace::new(Arc::clone(&self.vs_list), Arc::clone(&self.gc), self.policy)
            })
            .allocate(word_size, mdtype)
    }

    /// The retry path after a metadata-threshold collection.
    pub fn allocate_metadata_after_gc(
        &self,
        word_size: WordSize,
        mdtype: MetadataType,
    ) -> Result<Address, AllocError> {
        let mut guard = self.metaspace.lock();
        guard
            .get_or_insert_with(|| {
                Metaspace::new(Arc::clone(&self.vs_list), Arc::clone(&self.gc), self.policy)
            })
            .allocate_after_gc(word_size, mdtype)
    }

    pub fn register_klass(&self, klass: Arc<Klass>) {
        self.klasses.lock().push(klass);
    }

    /// Drops the registration of `klass` (a failed or redefined class).
    /// Its metadata is not reclaimed until the loader is; arenas free
    /// wholesale only.
    pub fn unregister_klass(&self, klass: &Arc<Klass>) -> bool {
        let mut klasses = self.klasses.lock();
        let before = klasses.len();
        klasses.retain(|k| !Arc::ptr_eq(k, klass));
        klasses.len() != before
    }

    pub fn klass_count(&self) -> usize {
        self.klasses.lock().len()
    }

    /// Claims this loader for the current trace. Returns true exactly once
    /// per cycle.
    pub fn try_claim(&self) -> bool {
        !self.claimed.swap(true, std::sync::atomic::Ordering::AcqRel)
    }

    pub fn clear_claimed(&self) {
        self.claimed.store(false, std::sync::atomic::Ordering::Relaxed);
    }

    /// Visits the heap references this loader keeps alive: the loader object
    /// itself and each class mirror.
    pub fn oops_do(&self, visitor: &mut dyn FnMut(ObjectReference)) {
        let loader = self.loader();
        if !loader.is_null() {
            visitor(loader);
        }
        for klass in self.klasses.lock().iter() {
            let mirror = klass.mirror();
            if !mirror.is_null() {
                visitor(mirror);
            }
        }
    }

    /// Rewrites the loader's heap references through `forwardee` during
    /// pointer adjustment.
    pub fn adjust_oops(
        &self,
        _safepoint: &Safepoint,
        forwardee: &mut dyn FnMut(ObjectReference) -> ObjectReference,
    ) {
        let loader = self.loader();
        if !loader.is_null() {
            self.loader.store(forwardee(loader), Ordering::Relaxed);
        }
        for klass in self.klasses.lock().iter() {
            let mirror = klass.mirror();
            if !mirror.is_null() {
                klass.set_mirror(forwardee(mirror));
            }
        }
    }

    pub fn used_words(&self) -> WordSize {
        self.metaspace.lock().as_ref().map_or(0, |m| m.used_words())
    }

    pub fn capacity_words(&self) -> WordSize {
        self.metaspace
            .lock()
            .as_ref()
            .map_or(0, |m| m.capacity_words())
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.metaspace
            .lock()
            .as_ref()
            .is_some_and(|m| m.contains(addr))
    }
}

/// All live [`ClassLoaderData`], starting from the bootstrap loader.
pub struct ClassLoaderDataGraph {
    bootstrap: Arc<ClassLoaderData>,
    loaders: Mutex<Vec<Arc<ClassLoaderData>>>,
    vs_list: Arc<VirtualSpaceList>,
    gc: Arc<MetaspaceGC>,
    policy: ChunkGrowthPolicy,
}

impl ClassLoaderDataGraph {
    pub fn new(
        vs_list: Arc<VirtualSpaceList>,
        gc: Arc<MetaspaceGC>,
        policy: ChunkGrowthPolicy,
    ) -> ClassLoaderDataGraph {
        let bootstrap = Arc::new(ClassLoaderData::new(
            ObjectReference::NULL,
            true,
            Arc::clone(&vs_list),
            Arc::clone(&gc),
            policy,
        ));
        ClassLoaderDataGraph {
            bootstrap,
            loaders: Mutex::new(Vec::new()),
            vs_list,
            gc,
            policy,
        }
    }

    pub fn bootstrap(&self) -> Arc<ClassLoaderData> {
        Arc::clone(&self.bootstrap)
    }

    /// The loader data for `loader`, registering it on first sight. The
    /// null reference maps to the bootstrap loader.
    pub fn find_or_create(&self, loader: ObjectReference) -> Arc<ClassLoaderData> {
        if loader.is_null() {
            return self.bootstrap();
        }
        let mut loaders = self.loaders.lock();
        if let Some(cld) = loaders
            .iter()
            .find(|cld| cld.loader() == loader && !cld.is_unloading())
        {
            return Arc::clone(cld);
        }
        let cld = Arc::new(ClassLoaderData::new(
            loader,
            false,
            Arc::clone(&self.vs_list),
            Arc::clone(&self.gc),
            self.policy,
        ));
        loaders.push(Arc::clone(&cld));
        cld
    }

    pub fn loader_count(&self) -> usize {
        self.loaders.lock().len() + 1
    }

    /// Visits every loader data, bootstrap first.
    pub fn clds_do(&self, f: &mut dyn FnMut(&Arc<ClassLoaderData>)) {
        f(&self.bootstrap);
        for cld in self.loaders.lock().iter() {
            f(cld);
        }
    }

    /// Resets every loader's claim flag ahead of a trace.
    pub fn clear_claims(&self, _safepoint: &Safepoint) {
        self.clds_do(&mut |cld| cld.clear_claimed());
    }

    /// Marks loaders whose loader object died as unloading. Marked loaders
    /// stay linked and walkable; [`purge`] later unlinks them and frees
    /// their metadata. The bootstrap loader is exempt. Returns the number
    /// newly marked.
    ///
    /// [`purge`]: ClassLoaderDataGraph::purge
    pub fn unload_dead(
        &self,
        _safepoint: &Safepoint,
        is_alive: &mut dyn FnMut(ObjectReference) -> bool,
    ) -> usize {
        let mut marked = 0;
        for cld in self.loaders.lock().iter() {
            if !cld.is_unloading() && !is_alive(cld.loader()) {
                cld.set_unloading();
                marked += 1;
            }
        }
        if marked > 0 {
            info!("marked {} class loaders for unloading", marked);
        }
        marked
    }

    /// Unlinks loaders marked unloading, releasing each one's metaspace
    /// chunks back to the free lists, then returns fully emptied
    /// virtual-space nodes to the operating system. Returns the number of
    /// nodes unmapped.
    pub fn purge(&self, safepoint: &Safepoint) -> usize {
        let unlinked = {
            let mut loaders = self.loaders.lock();
            let before = loaders.len();
            loaders.retain(|cld| !cld.is_unloading());
            before - loaders.len()
        };
        if unlinked > 0 {
            info!("unloaded {} class loaders", unlinked);
        }
        self.vs_list.purge(safepoint)
    }

    /// Total metadata words in use, summed over every loader. Walks the
    /// whole graph; for pause-time reporting, not hot paths.
    pub fn used_words_slow(&self) -> WordSize {
        let mut total = 0;
        self.clds_do(&mut |cld| total += cld.used_words());
        total
    }

    pub fn capacity_words_slow(&self) -> WordSize {
        let mut total = 0;
        self.clds_do(&mut |cld| total += cld.capacity_words());
        total
    }

    /// Whether `addr` lies in any loader's metaspace.
    pub fn contains(&self, addr: Address) -> bool {
        let mut found = false;
        self.clds_do(&mut |cld| found = found || cld.contains(addr));
        found
    }
}
