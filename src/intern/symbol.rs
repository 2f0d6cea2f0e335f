use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Refcount value marking a symbol as permanent. A permanent symbol is never
/// reclaimed and its refcount never changes again.
pub const PERM_REFCOUNT: u32 = u32::MAX;

/// Longest symbol the table will intern, in bytes.
pub const MAX_LENGTH: usize = u16::MAX as usize;

/// An interned, refcounted name. Canonical within a [`SymbolTable`]: equal
/// byte sequences intern to the same `Arc<Symbol>`, so equality checks at the
/// use sites collapse to pointer identity.
///
/// The refcount counts non-table holders. It saturates: once it climbs to
/// [`PERM_REFCOUNT`] the symbol is permanent and both increments and
/// decrements become no-ops.
///
/// [`SymbolTable`]: crate::intern::SymbolTable
pub struct Symbol {
    bytes: Box<[u8]>,
    refcount: AtomicU32,
}

impl Symbol {
    pub(crate) fn new(bytes: &[u8], initial_refcount: u32) -> Symbol {
        debug_assert!(bytes.len() <= MAX_LENGTH);
        Symbol {
            bytes: bytes.into(),
            refcount: AtomicU32::new(initial_refcount),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The symbol as UTF-8 text, when it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Relaxed)
    }

    pub fn is_permanent(&self) -> bool {
        self.refcount() == PERM_REFCOUNT
    }

    /// Adds a holder. Saturates into permanence rather than wrapping.
    pub fn increment_refcount(&self) {
        let mut cur = self.refcount.load(Ordering::Relaxed);
        loop {
            if cur == PERM_REFCOUNT {
                return;
            }
            match self.refcount.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Drops a holder. A symbol whose count reaches zero becomes eligible
    /// for unlinking at the next safepoint cleanup.
    pub fn decrement_refcount(&self) {
        let mut cur = self.refcount.load(Ordering::Relaxed);
        loop {
            if cur == PERM_REFCOUNT {
                return;
            }
            if cur == 0 {
                debug_assert!(false, "symbol refcount underflow: {:?}", self);
                return;
            }
            match self.refcount.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => cur = observed,
            }
        }
    }

    pub(crate) fn make_permanent(&self) {
        self.refcount.store(PERM_REFCOUNT, Ordering::Relaxed);
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Symbol) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Symbol {}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "Symbol({:?}, rc={})", s, self.refcount()),
            None => write!(f, "Symbol({:x?}, rc={})", self.bytes, self.refcount()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_tracks_holders() {
        let s = Symbol::new(b"java/lang/Object", 1);
        assert_eq!(s.refcount(), 1);
        s.increment_refcount();
        s.increment_refcount();
        assert_eq!(s.refcount(), 3);
        s.decrement_refcount();
        s.decrement_refcount();
        s.decrement_refcount();
        assert_eq!(s.refcount(), 0);
    }

    #[test]
    fn permanent_symbols_ignore_count_changes() {
        let s = Symbol::new(b"<init>", 1);
        s.make_permanent();
        assert!(s.is_permanent());
        s.increment_refcount();
        s.decrement_refcount();
        s.decrement_refcount();
        assert_eq!(s.refcount(), PERM_REFCOUNT);
    }

    #[test]
    fn saturating_increment_becomes_permanent() {
        let s = Symbol::new(b"x", PERM_REFCOUNT - 1);
        s.increment_refcount();
        assert!(s.is_permanent());
        s.increment_refcount();
        assert!(s.is_permanent());
    }

    #[test]
    fn equality_is_by_content() {
        let a = Symbol::new(b"foo", 1);
        let b = Symbol::new(b"foo", 5);
        let c = Symbol::new(b"bar", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), Some("foo"));
    }
}
