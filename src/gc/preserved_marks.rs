use super::mark_word::MarkWord;
use super::ObjectModel;
use crate::util::ObjectReference;

/// Side storage for header words that marking would otherwise destroy.
///
/// Most objects carry the prototype word and need nothing saved; the few
/// that carry real state (an identity hash) are recorded here before their
/// header is overwritten, and written back once the cycle is done.
///
/// Storage is a fixed-capacity dense table with growable overflow stacks
/// behind it. The overflow stacks record objects and words pairwise and
/// must stay the same length.
pub struct PreservedMarks {
    dense: Vec<(ObjectReference, MarkWord)>,
    capacity: usize,
    overflow_objects: Vec<ObjectReference>,
    overflow_marks: Vec<MarkWord>,
}

impl PreservedMarks {
    pub fn new(capacity: usize) -> PreservedMarks {
        PreservedMarks {
            dense: Vec::with_capacity(capacity),
            capacity,
            overflow_objects: Vec::new(),
            overflow_marks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.dense.len() + self.overflow_objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records `mark` as the word to restore to `object` after the cycle.
    pub fn preserve(&mut self, object: ObjectReference, mark: MarkWord) {
        debug_assert!(mark.must_be_preserved());
        if self.dense.len() < self.capacity {
            self.dense.push((object, mark));
        } else {
            self.overflow_objects.push(object);
            self.overflow_marks.push(mark);
        }
    }

    /// Rewrites recorded object references through `forwardee` so restore
    /// targets post-compaction locations. Runs after forwarding pointers are
    /// installed and before objects move.
    pub fn adjust(&mut self, forwardee: &mut dyn FnMut(ObjectReference) -> ObjectReference) {
        for (object, _) in self.dense.iter_mut() {
            *object = forwardee(*object);
        }
        for object in self.overflow_objects.iter_mut() {
            *object = forwardee(*object);
        }
    }

    /// Writes every recorded word back into its object's header and empties
    /// the storage.
    pub fn restore(&mut self, model: &dyn ObjectModel) {
        assert!(
            self.overflow_objects.len() == self.overflow_marks.len(),
            "preserved mark stacks diverged: {} objects, {} marks",
            self.overflow_objects.len(),
            self.overflow_marks.len()
        );
        for (object, mark) in self.dense.drain(..) {
            model.set_header(object, mark);
        }
        for (object, mark) in self
            .overflow_objects
            .drain(..)
            .zip(self.overflow_marks.drain(..))
        {
            model.set_header(object, mark);
        }
    }
}
