//! Stop-the-world collection support: the safepoint capability token, heap
//! slot handles, the object model seam, mark words, preserved marks and the
//! mark/adjust core of the sliding collector.

pub mod mark_sweep;
pub mod mark_word;
pub mod preserved_marks;

pub use mark_sweep::MarkSweep;
pub use mark_word::MarkWord;
pub use preserved_marks::PreservedMarks;

use crate::loader::ClassLoaderData;
use crate::util::{Address, ObjectReference};
#[cfg(debug_assertions)]
use std::cell::Cell;
use std::sync::Arc;

#[cfg(debug_assertions)]
thread_local! {
    static NO_SAFEPOINT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Capability token witnessing that all mutators are paused. Structural table
/// surgery (unlink, rehash, chunk purging, pointer adjustment) demands one,
/// which keeps those operations out of reach of concurrent mutator paths at
/// the type level.
///
/// Constructing the token asserts the world is actually stoppable from here:
/// a thread inside a [`NoSafepointGuard`] scope cannot begin one.
pub struct Safepoint {
    _private: (),
}

impl Safepoint {
    pub fn begin() -> Safepoint {
        #[cfg(debug_assertions)]
        NO_SAFEPOINT_DEPTH.with(|depth| {
            assert!(
                depth.get() == 0,
                "safepoint begun inside a no-safepoint scope"
            );
        });
        Safepoint { _private: () }
    }
}

/// Marks a scope that must not reach a safepoint, such as the window between
/// bumping a symbol's refcount and handing the reference out. Debug builds
/// catch a [`Safepoint::begin`] inside the scope; release builds compile the
/// guard away.
pub struct NoSafepointGuard {
    _private: (),
}

impl NoSafepointGuard {
    pub fn enter() -> NoSafepointGuard {
        #[cfg(debug_assertions)]
        NO_SAFEPOINT_DEPTH.with(|depth| depth.set(depth.get() + 1));
        NoSafepointGuard { _private: () }
    }
}

impl Drop for NoSafepointGuard {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        NO_SAFEPOINT_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// A heap location holding an [`ObjectReference`], visited during tracing
/// and rewritten during pointer adjustment.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Slot(pub Address);

impl Slot {
    pub fn load(&self) -> ObjectReference {
        unsafe { self.0.load::<ObjectReference>() }
    }

    pub fn store(&self, value: ObjectReference) {
        unsafe { self.0.store(value) }
    }
}

/// The collector's view of the runtime's object layout. The collector never
/// assumes anything about objects beyond this trait: where the header word
/// lives, which slots an object holds, and how arrays chunk.
pub trait ObjectModel {
    /// The header word, interpreted as a [`MarkWord`] during collection.
    fn header(&self, object: ObjectReference) -> MarkWord;

    fn set_header(&self, object: ObjectReference, mark: MarkWord);

    /// Reports every reference slot of `object` to `visitor`.
    fn scan_object(&self, object: ObjectReference, visitor: &mut dyn FnMut(Slot));

    /// Returns the element count if `object` is a reference array, otherwise
    /// `None`. Reference arrays are traced in bounded chunks rather than
    /// through `scan_object`.
    fn obj_array_length(&self, object: ObjectReference) -> Option<usize>;

    /// The slot of element `index` of a reference array.
    fn obj_array_slot(&self, object: ObjectReference, index: usize) -> Slot;

    /// The loader whose metaspace holds this object's class metadata, if the
    /// runtime tracks one for it.
    fn class_loader_data(&self, object: ObjectReference) -> Option<Arc<ClassLoaderData>>;
}
