//! Metaspace is the memory core of a managed-language runtime: the
//! class-metadata heap (per-loader bump-allocated arenas carved out of
//! reserved virtual memory), the canonicalizing symbol and string intern
//! tables, the class-loader data graph that roots metadata for collection,
//! and the mark-sweep collector's marking and pointer-adjustment
//! bookkeeping.
//!
//! The crate is a library: it owns no threads and drives no collections.
//! The embedding runtime calls in to allocate metadata and intern names,
//! and its GC driver calls back in at safepoints to unlink dead table
//! entries, purge unloaded class loaders and adjust references. All
//! process-wide state lives in an explicitly constructed
//! [`MetaspaceRuntime`]; there are no ambient singletons.
//!
//! * [`metaspace`](crate::metaspace): chunks, virtual-space lists, per-loader
//!   arenas and the GC trigger policy.
//! * [`intern`](crate::intern): reference-counted symbols and the
//!   safepoint-synchronized intern tables.
//! * [`loader`](crate::loader): per-loader metadata contexts and the graph
//!   the collector traces.
//! * [`gc`](crate::gc): mark stack, preserved marks and pointer adjustment.
//! * [`util`](crate::util): addresses, raw memory, options and logging.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate static_assertions;

pub mod gc;
pub mod intern;
pub mod loader;
pub mod metaspace;
mod runtime;
pub mod util;

pub use crate::runtime::{GcEpilogueStats, MetaspaceRuntime};
pub use crate::util::address::{Address, ObjectReference};
