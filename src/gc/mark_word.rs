use crate::util::constants::BYTES_IN_WORD;
use crate::util::Address;
use std::fmt;

const TAG_MASK: usize = 0b11;
const TAG_NEUTRAL: usize = 0b00;
const TAG_MARKED: usize = 0b01;
const TAG_FORWARDED: usize = 0b11;
const HASH_SHIFT: usize = 2;

// Forwarding pointers live in the upper bits, so object addresses must keep
// the two low bits free.
const_assert!(BYTES_IN_WORD >= 4);

/// An object's header word as the collector sees it. The low two bits tag
/// the collection state; the remaining bits carry state-dependent payload:
///
/// * `0b00` neutral: the mutator's word, upper bits hold the identity hash
///   (zero when none was computed).
/// * `0b01` marked: the object is live in the current cycle. No payload; a
///   neutral word with payload is saved in [`PreservedMarks`] before the
///   overwrite.
/// * `0b11` forwarded: upper bits are the object's post-compaction address.
///
/// [`PreservedMarks`]: crate::gc::PreservedMarks
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct MarkWord(usize);

impl MarkWord {
    /// The neutral word every object starts with.
    pub const PROTOTYPE: MarkWord = MarkWord(TAG_NEUTRAL);

    pub const fn from_raw(raw: usize) -> MarkWord {
        MarkWord(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }

    pub const fn is_neutral(self) -> bool {
        self.0 & TAG_MASK == TAG_NEUTRAL
    }

    pub const fn is_marked(self) -> bool {
        self.0 & TAG_MASK == TAG_MARKED
    }

    pub const fn is_forwarded(self) -> bool {
        self.0 & TAG_MASK == TAG_FORWARDED
    }

    /// The word marking overwrites headers with.
    pub const fn marked() -> MarkWord {
        MarkWord(TAG_MARKED)
    }

    /// The widest identity hash a header can carry. Any `u32` fits on
    /// 64-bit targets; 32-bit targets lose the tag bits' worth.
    pub const MAX_HASH: u32 = (usize::MAX >> HASH_SHIFT) as u32;

    /// A neutral word carrying an identity hash, at most [`MAX_HASH`].
    ///
    /// [`MAX_HASH`]: MarkWord::MAX_HASH
    pub const fn with_hash(hash: u32) -> MarkWord {
        debug_assert!(hash <= MarkWord::MAX_HASH);
        MarkWord(((hash as usize) << HASH_SHIFT) | TAG_NEUTRAL)
    }

    /// The identity hash, if this is a neutral word that carries one.
    pub fn hash(self) -> Option<u32> {
        if self.is_neutral() && self.0 >> HASH_SHIFT != 0 {
            Some((self.0 >> HASH_SHIFT) as u32)
        } else {
            None
        }
    }

    /// Whether overwriting this word with a mark would lose state that must
    /// come back after the cycle. The prototype does not qualify; restoring
    /// it is the default.
    pub fn must_be_preserved(self) -> bool {
        self.is_neutral() && self != MarkWord::PROTOTYPE
    }

    /// A forwarding word pointing at `new_location`.
    pub fn forwarded_to(new_location: Address) -> MarkWord {
        debug_assert!(new_location.is_aligned_to(BYTES_IN_WORD));
        MarkWord(new_location.as_usize() | TAG_FORWARDED)
    }

    /// The post-compaction address of a forwarded object.
    pub fn forwardee(self) -> Address {
        debug_assert!(self.is_forwarded());
        unsafe { Address::from_usize(self.0 & !TAG_MASK) }
    }
}

impl fmt::Debug for MarkWord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_forwarded() {
            write!(f, "MarkWord(forwarded -> {})", self.forwardee())
        } else if self.is_marked() {
            write!(f, "MarkWord(marked)")
        } else {
            write!(f, "MarkWord(neutral, {:#x})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_disjoint() {
        assert!(MarkWord::PROTOTYPE.is_neutral());
        assert!(!MarkWord::PROTOTYPE.is_marked());
        assert!(MarkWord::marked().is_marked());
        assert!(!MarkWord::marked().is_forwarded());
        let fwd = MarkWord::forwarded_to(unsafe { Address::from_usize(0x4000) });
        assert!(fwd.is_forwarded());
        assert!(!fwd.is_neutral());
    }

    #[test]
    fn hash_survives_the_tag() {
        let w = MarkWord::with_hash(0xdead_beef);
        assert!(w.is_neutral());
        assert_eq!(w.hash(), Some(0xdead_beef));
        assert!(w.must_be_preserved());
        assert_eq!(MarkWord::PROTOTYPE.hash(), None);
        assert!(!MarkWord::PROTOTYPE.must_be_preserved());
    }

    #[test]
    fn widest_hash_roundtrips_on_any_word_size() {
        let w = MarkWord::with_hash(MarkWord::MAX_HASH);
        assert!(w.is_neutral());
        assert_eq!(w.hash(), Some(MarkWord::MAX_HASH));
        assert!(w.must_be_preserved());
    }

    #[test]
    fn forwardee_roundtrip() {
        let target = unsafe { Address::from_usize(0x7f00_0000) };
        let w = MarkWord::forwarded_to(target);
        assert_eq!(w.forwardee(), target);
    }

    #[test]
    fn marked_word_has_nothing_to_preserve() {
        assert!(!MarkWord::marked().must_be_preserved());
    }
}
