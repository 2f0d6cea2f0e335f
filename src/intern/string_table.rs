use super::table::InternTable;
use crate::gc::Safepoint;
use crate::util::ObjectReference;

/// A string table entry: the UTF-16 literal and the heap object that
/// canonically represents it. The object reference is a root into the heap
/// and gets rewritten during pointer adjustment.
struct StrEntry {
    chars: Box<[u16]>,
    object: ObjectReference,
}

/// The canonical heap-string table, keyed by UTF-16 content. Unlike symbols
/// the values are heap objects, so liveness comes from the collector rather
/// than a refcount: dead strings are unlinked with an `is_alive` oracle and
/// surviving references are adjusted when objects move.
pub struct StringTable {
    table: InternTable<StrEntry>,
}

impl StringTable {
    pub fn new(buckets: usize, rehash_chain_threshold: usize) -> StringTable {
        StringTable {
            table: InternTable::new("string table", buckets, rehash_chain_threshold),
        }
    }

    fn hash(&self, chars: &[u16]) -> u32 {
        match self.table.seed() {
            Some(seed) => super::alt_hash_chars(seed, chars),
            None => super::primary_hash_chars(chars),
        }
    }

    pub fn lookup(&self, chars: &[u16]) -> Option<ObjectReference> {
        self.table.lookup(
            self.hash(chars),
            &mut |e| *e.chars == *chars,
            &mut |e| e.object,
        )
    }

    /// Interns `chars`, calling `create` to materialize the heap string only
    /// when no canonical object exists yet. Losing an insert race discards
    /// nothing: `create` runs only for the thread that actually inserts.
    pub fn intern_with(
        &self,
        chars: &[u16],
        create: impl FnOnce(&[u16]) -> ObjectReference,
    ) -> ObjectReference {
        self.table.intern(
            self.hash(chars),
            &mut |e| *e.chars == *chars,
            || StrEntry {
                chars: chars.into(),
                object: create(chars),
            },
            &mut |e| e.object,
        )
    }

    pub fn intern_str(
        &self,
        s: &str,
        create: impl FnOnce(&[u16]) -> ObjectReference,
    ) -> ObjectReference {
        let chars: Vec<u16> = s.encode_utf16().collect();
        self.intern_with(&chars, create)
    }

    /// Removes entries whose heap string the collector found dead.
    /// Safepoint-only; returns the number unlinked.
    pub fn unlink(
        &self,
        safepoint: &Safepoint,
        is_alive: &mut dyn FnMut(ObjectReference) -> bool,
    ) -> usize {
        let removed = self.table.unlink(safepoint, &mut |e| !is_alive(e.object));
        #[cfg(feature = "extreme_assertions")]
        self.verify();
        removed
    }

    /// Rewrites every entry's object reference through `forwardee` after a
    /// sliding compaction. Safepoint-only.
    pub fn adjust(
        &self,
        safepoint: &Safepoint,
        forwardee: &mut dyn FnMut(ObjectReference) -> ObjectReference,
    ) {
        self.table.for_each_mut(safepoint, &mut |e| {
            e.object = forwardee(e.object);
        });
    }

    pub fn needs_rehash(&self) -> bool {
        self.table.needs_rehash()
    }

    pub fn rehash_if_needed(&self, safepoint: &Safepoint) -> bool {
        if !self.table.needs_rehash() {
            return false;
        }
        let seed = super::new_seed();
        self.table.rehash(safepoint, seed, &mut |e, seed| {
            super::alt_hash_chars(seed, &e.chars)
        });
        #[cfg(feature = "extreme_assertions")]
        self.verify();
        true
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.len() == 0
    }

    /// (longest chain, entry count), for diagnostics.
    pub fn chain_stats(&self) -> (usize, usize) {
        self.table.chain_stats()
    }

    pub fn verify(&self) {
        self.table.verify(&mut |e| match self.table.seed() {
            Some(seed) => super::alt_hash_chars(seed, &e.chars),
            None => super::primary_hash_chars(&e.chars),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Address;

    fn obj(addr: usize) -> ObjectReference {
        ObjectReference::from_address(unsafe { Address::from_usize(addr) })
    }

    #[test]
    fn create_runs_once_per_literal() {
        let table = StringTable::new(31, 100);
        let mut created = 0;
        let first = table.intern_str("hello", |_| {
            created += 1;
            obj(0x1000)
        });
        let second = table.intern_str("hello", |_| {
            created += 1;
            obj(0x2000)
        });
        assert_eq!(first, second);
        assert_eq!(created, 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn lookup_misses_without_creating() {
        let table = StringTable::new(31, 100);
        let chars: Vec<u16> = "absent".encode_utf16().collect();
        assert!(table.lookup(&chars).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn dead_strings_are_unlinked() {
        let table = StringTable::new(31, 100);
        let live = table.intern_str("live", |_| obj(0x1000));
        table.intern_str("dead", |_| obj(0x2000));

        let safepoint = Safepoint::begin();
        let removed = table.unlink(&safepoint, &mut |o| o == live);
        assert_eq!(removed, 1);
        drop(safepoint);

        let chars: Vec<u16> = "live".encode_utf16().collect();
        assert_eq!(table.lookup(&chars), Some(live));
        let gone: Vec<u16> = "dead".encode_utf16().collect();
        assert!(table.lookup(&gone).is_none());
    }

    #[test]
    fn adjust_rewrites_references() {
        let table = StringTable::new(31, 100);
        table.intern_str("moved", |_| obj(0x1000));

        let safepoint = Safepoint::begin();
        table.adjust(&safepoint, &mut |o| {
            assert_eq!(o, obj(0x1000));
            obj(0x8000)
        });
        drop(safepoint);

        let chars: Vec<u16> = "moved".encode_utf16().collect();
        assert_eq!(table.lookup(&chars), Some(obj(0x8000)));
    }

    #[test]
    fn rehash_preserves_lookup() {
        let table = StringTable::new(31, 100);
        for i in 0..50usize {
            table.intern_str(&format!("s{}", i), |_| obj(0x1000 + i * 16));
        }
        let safepoint = Safepoint::begin();
        let seed = crate::intern::new_seed();
        table.table.rehash(&safepoint, seed, &mut |e, seed| {
            crate::intern::alt_hash_chars(seed, &e.chars)
        });
        drop(safepoint);

        for i in 0..50usize {
            let chars: Vec<u16> = format!("s{}", i).encode_utf16().collect();
            assert_eq!(table.lookup(&chars), Some(obj(0x1000 + i * 16)));
        }
        table.verify();
    }
}
