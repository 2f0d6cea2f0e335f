//! The class-metadata heap. Space is reserved from the OS in large
//! virtual-space nodes, carved into bump-allocated chunks, and handed to
//! per-class-loader arenas. Committed capacity is policed by the
//! [`MetaspaceGC`] high-water-mark policy: no allocation grows the committed
//! total past the mark without a collection having been offered first.

pub mod arena;
pub mod chunk;
pub mod gc_trigger;
pub mod virtual_space;

pub use arena::{ChunkGrowthPolicy, Metaspace};
pub use chunk::Metachunk;
pub use gc_trigger::{MetaspaceGC, TriggerState};
pub use virtual_space::VirtualSpaceList;

use crate::util::address::WordSize;
use std::fmt;

/// The two independent allocation streams of an arena: ordinary metadata and
/// the compressed class space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataType {
    NonClass,
    Class,
}

impl MetadataType {
    pub const COUNT: usize = 2;

    pub(crate) const fn index(self) -> usize {
        match self {
            MetadataType::NonClass => 0,
            MetadataType::Class => 1,
        }
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MetadataType::NonClass => write!(f, "non-class"),
            MetadataType::Class => write!(f, "class"),
        }
    }
}

/// A metadata allocation failure. Both variants are recoverable as far as
/// the process is concerned; only the failing class definition is affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The request would push committed capacity past the current
    /// high-water mark. The caller should run a collection (which recomputes
    /// the mark) and retry with
    /// [`allocate_after_gc`](crate::metaspace::Metaspace::allocate_after_gc).
    GcPressure {
        word_size: WordSize,
        mdtype: MetadataType,
    },
    /// Virtual space (or the hard metaspace ceiling) is exhausted. Fatal to
    /// the requesting class definition, not to the process.
    OutOfMemory {
        word_size: WordSize,
        mdtype: MetadataType,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocError::GcPressure { word_size, mdtype } => write!(
                f,
                "metaspace high-water mark reached allocating {} {} words; collect and retry",
                word_size, mdtype
            ),
            AllocError::OutOfMemory { word_size, mdtype } => write!(
                f,
                "out of metaspace allocating {} {} words",
                word_size, mdtype
            ),
        }
    }
}

impl std::error::Error for AllocError {}
