use super::mark_word::MarkWord;
use super::preserved_marks::PreservedMarks;
use super::{ObjectModel, Safepoint, Slot};
use crate::util::ObjectReference;

/// Reference arrays are traced in chunks of this many elements so one huge
/// array cannot monopolize the marking stack.
pub const OBJ_ARRAY_CHUNK: usize = 512;

/// A unit of marking work: either a freshly marked object awaiting its scan,
/// or the continuation of a partially scanned reference array.
#[derive(Copy, Clone, Debug)]
enum MarkTask {
    Object(ObjectReference),
    ObjArray(ObjectReference, usize),
}

/// The mark and adjust phases of a stop-the-world sliding collection, built
/// over an [`ObjectModel`].
///
/// A cycle runs in order: [`mark_from_roots`], then the caller decides new
/// locations and installs them with [`set_forwarding`], then
/// [`adjust_roots`] / [`adjust_slot`] / [`adjust_marks`] rewrite every
/// reference, then after objects move [`restore_marks`] puts saved header
/// words back. Marking is iterative; graph depth never grows the call
/// stack.
///
/// [`mark_from_roots`]: MarkSweep::mark_from_roots
/// [`set_forwarding`]: MarkSweep::set_forwarding
/// [`adjust_roots`]: MarkSweep::adjust_roots
/// [`adjust_slot`]: MarkSweep::adjust_slot
/// [`adjust_marks`]: MarkSweep::adjust_marks
/// [`restore_marks`]: MarkSweep::restore_marks
pub struct MarkSweep<'a, M: ObjectModel> {
    model: &'a M,
    marking_stack: Vec<MarkTask>,
    preserved: PreservedMarks,
    marked: usize,
}

impl<'a, M: ObjectModel> MarkSweep<'a, M> {
    pub fn new(model: &'a M, preserved_capacity: usize) -> MarkSweep<'a, M> {
        MarkSweep {
            model,
            marking_stack: Vec::new(),
            preserved: PreservedMarks::new(preserved_capacity),
            marked: 0,
        }
    }

    /// Objects marked live in this cycle.
    pub fn marked_count(&self) -> usize {
        self.marked
    }

    pub fn is_marked(&self, object: ObjectReference) -> bool {
        self.model.header(object).is_marked()
    }

    /// Marks the transitive closure of `roots`.
    pub fn mark_from_roots(&mut self, _safepoint: &Safepoint, roots: &[Slot]) {
        debug_assert!(self.marking_stack.is_empty());
        for root in roots {
            self.mark_slot(*root);
        }
        self.follow_stack();
        debug!("marked {} objects from {} roots", self.marked, roots.len());
    }

    /// Marks the object `slot` refers to, if any. Work discovered outside
    /// [`mark_from_roots`], such as a late root set, enters here and is
    /// drained by the next [`follow_stack`].
    ///
    /// [`mark_from_roots`]: MarkSweep::mark_from_roots
    /// [`follow_stack`]: MarkSweep::follow_stack
    pub fn mark_slot(&mut self, slot: Slot) {
        let object = slot.load();
        if !object.is_null() {
            self.mark_object(object);
        }
    }

    /// Marks one object and queues it for scanning. Headers that carry state
    /// are saved before the overwrite; already-marked objects are skipped.
    pub fn mark_object(&mut self, object: ObjectReference) {
        let header = self.model.header(object);
        if header.is_marked() {
            return;
        }
        debug_assert!(header.is_neutral(), "marking saw header {:?}", header);
        if header.must_be_preserved() {
            self.preserved.preserve(object, header);
        }
        self.model.set_header(object, MarkWord::marked());
        self.marked += 1;
        self.marking_stack.push(MarkTask::Object(object));
    }

    /// Drains the marking stack to a fixed point, scanning every queued
    /// object and anything it reaches.
    pub fn follow_stack(&mut self) {
        while let Some(task) = self.marking_stack.pop() {
            match task {
                MarkTask::Object(object) => self.follow_object(object),
                MarkTask::ObjArray(object, start) => self.follow_array(object, start),
            }
        }
    }

    fn follow_object(&mut self, object: ObjectReference) {
        let model = self.model;
        if let Some(cld) = model.class_loader_data(object) {
            if cld.try_claim() {
                cld.oops_do(&mut |oop| self.mark_object(oop));
            }
        }
        if model.obj_array_length(object).is_some() {
            self.follow_array(object, 0);
        } else {
            model.scan_object(object, &mut |slot| self.mark_slot(slot));
        }
    }

    fn follow_array(&mut self, object: ObjectReference, start: usize) {
        let model = self.model;
        let len = match model.obj_array_length(object) {
            Some(len) => len,
            None => panic!("array continuation for non-array object {}", object),
        };
        let end = std::cmp::min(start + OBJ_ARRAY_CHUNK, len);
        // Continuation goes on the stack before the elements do, so the
        // stack holds at most one pending chunk per array.
        if end < len {
            self.marking_stack.push(MarkTask::ObjArray(object, end));
        }
        for index in start..end {
            self.mark_slot(model.obj_array_slot(object, index));
        }
    }

    /// Installs `new_location` as `object`'s forwarding pointer. The caller
    /// computes locations; only marked objects may be forwarded.
    pub fn set_forwarding(&self, object: ObjectReference, new_location: ObjectReference) {
        debug_assert!(self.model.header(object).is_marked());
        self.model
            .set_header(object, MarkWord::forwarded_to(new_location.to_address()));
    }

    /// Where `object` will live after compaction: its forwarding target, or
    /// itself if it does not move.
    pub fn forwardee(&self, object: ObjectReference) -> ObjectReference {
        let header = self.model.header(object);
        if header.is_forwarded() {
            ObjectReference::from_address(header.forwardee())
        } else {
            object
        }
    }

    /// Rewrites one slot through the forwarding pointers.
    pub fn adjust_slot(&self, slot: Slot) {
        let object = slot.load();
        if object.is_null() {
            return;
        }
        let forwardee = self.forwardee(object);
        if forwardee != object {
            slot.store(forwardee);
        }
    }

    pub fn adjust_roots(&self, _safepoint: &Safepoint, roots: &[Slot]) {
        for root in roots {
            self.adjust_slot(*root);
        }
    }

    /// Walks the reference slots of one live object, rewriting each through
    /// the forwarding pointers. The caller applies this to every live object
    /// during the adjust phase.
    pub fn adjust_object_slots(&self, object: ObjectReference) {
        let model = self.model;
        if let Some(len) = model.obj_array_length(object) {
            for index in 0..len {
                self.adjust_slot(model.obj_array_slot(object, index));
            }
        } else {
            model.scan_object(object, &mut |slot| self.adjust_slot(slot));
        }
    }

    /// Retargets the preserved mark records at post-compaction addresses.
    /// Runs after every forwarding pointer is installed.
    pub fn adjust_marks(&mut self, _safepoint: &Safepoint) {
        let model = self.model;
        self.preserved.adjust(&mut |object| {
            let header = model.header(object);
            if header.is_forwarded() {
                ObjectReference::from_address(header.forwardee())
            } else {
                object
            }
        });
    }

    /// Writes saved header words back after compaction. The caller has
    /// already reset moved objects' headers to the prototype; this reapplies
    /// the few that carried state.
    pub fn restore_marks(&mut self, _safepoint: &Safepoint) {
        let count = self.preserved.len();
        self.preserved.restore(self.model);
        debug!("restored {} preserved marks", count);
    }

    /// Resets a live object's header to the prototype at the end of the
    /// cycle.
    pub fn clear_mark(&self, object: ObjectReference) {
        self.model.set_header(object, MarkWord::PROTOTYPE);
    }
}
