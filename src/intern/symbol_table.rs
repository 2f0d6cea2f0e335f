use super::symbol::{Symbol, MAX_LENGTH};
use super::table::InternTable;
use super::InternError;
use crate::gc::{NoSafepointGuard, Safepoint};
use std::sync::Arc;

/// The canonical name table. Interning equal byte sequences yields the same
/// `Arc<Symbol>`, and the symbol's refcount tracks how many holders keep it
/// alive across cleanups.
///
/// Every path that hands a symbol out bumps its refcount before the
/// reference escapes, inside a no-safepoint scope, so cleanup at a safepoint
/// can never observe a symbol that is about to gain a holder.
pub struct SymbolTable {
    table: InternTable<Arc<Symbol>>,
}

impl SymbolTable {
    pub fn new(buckets: usize, rehash_chain_threshold: usize) -> SymbolTable {
        SymbolTable {
            table: InternTable::new("symbol table", buckets, rehash_chain_threshold),
        }
    }

    fn hash(&self, name: &[u8]) -> u32 {
        match self.table.seed() {
            Some(seed) => super::alt_hash_bytes(seed, name),
            None => super::primary_hash_bytes(name),
        }
    }

    /// Finds an existing symbol without creating one. A hit is counted as a
    /// new holder.
    pub fn lookup(&self, name: &[u8]) -> Option<Arc<Symbol>> {
        let _no_safepoint = NoSafepointGuard::enter();
        self.table.lookup(
            self.hash(name),
            &mut |s| s.as_bytes() == name,
            &mut |s| {
                s.increment_refcount();
                Arc::clone(s)
            },
        )
    }

    /// Interns `name`, creating the symbol on first sight. The returned
    /// reference is counted.
    pub fn intern(&self, name: &[u8]) -> Result<Arc<Symbol>, InternError> {
        if name.len() > MAX_LENGTH {
            return Err(InternError::NameTooLong { len: name.len() });
        }
        let _no_safepoint = NoSafepointGuard::enter();
        // Symbols are born with refcount 0 and counted in the found hook, so
        // winner and loser of an insert race account identically.
        Ok(self.table.intern(
            self.hash(name),
            &mut |s| s.as_bytes() == name,
            || Arc::new(Symbol::new(name, 0)),
            &mut |s| {
                s.increment_refcount();
                Arc::clone(s)
            },
        ))
    }

    pub fn intern_str(&self, name: &str) -> Result<Arc<Symbol>, InternError> {
        self.intern(name.as_bytes())
    }

    /// Interns `name` as a permanent symbol, exempt from refcounting and
    /// cleanup. Used for names baked into the runtime.
    pub fn intern_permanent(&self, name: &[u8]) -> Result<Arc<Symbol>, InternError> {
        if name.len() > MAX_LENGTH {
            return Err(InternError::NameTooLong { len: name.len() });
        }
        let _no_safepoint = NoSafepointGuard::enter();
        Ok(self.table.intern(
            self.hash(name),
            &mut |s| s.as_bytes() == name,
            || Arc::new(Symbol::new(name, 0)),
            &mut |s| {
                s.make_permanent();
                Arc::clone(s)
            },
        ))
    }

    /// Removes symbols no holder references. Safepoint-only; returns the
    /// number unlinked.
    pub fn unlink(&self, safepoint: &Safepoint) -> usize {
        let removed = self.table.unlink(safepoint, &mut |s| s.refcount() == 0);
        #[cfg(feature = "extreme_assertions")]
        self.verify();
        removed
    }

    pub fn needs_rehash(&self) -> bool {
        self.table.needs_rehash()
    }

    /// Moves the table to a freshly seeded hash function if flooding was
    /// flagged. Returns whether a rehash happened.
    pub fn rehash_if_needed(&self, safepoint: &Safepoint) -> bool {
        if !self.table.needs_rehash() {
            return false;
        }
        let seed = super::new_seed();
        self.table
            .rehash(safepoint, seed, &mut |s, seed| {
                super::alt_hash_bytes(seed, s.as_bytes())
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

    /// Checks cached hashes and bucket placement of every entry.
    pub fn verify(&self) {
        self.table.verify(&mut |s| match self.table.seed() {
            Some(seed) => super::alt_hash_bytes(seed, s.as_bytes()),
            None => super::primary_hash_bytes(s.as_bytes()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_table() -> SymbolTable {
        SymbolTable::new(31, 100)
    }

    #[test]
    fn interning_canonicalizes() {
        let table = small_table();
        let s1 = table.intern(b"foo").unwrap();
        assert_eq!(s1.refcount(), 1);
        let s2 = table.lookup(b"foo").unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(s1.refcount(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unreferenced_symbols_are_unlinked() {
        let table = small_table();
        let s1 = table.intern(b"foo").unwrap();
        let s2 = table.lookup(b"foo").unwrap();
        s1.decrement_refcount();
        s2.decrement_refcount();
        assert_eq!(s1.refcount(), 0);
        drop(s2);

        let safepoint = Safepoint::begin();
        assert_eq!(table.unlink(&safepoint), 1);
        drop(safepoint);
        assert!(table.lookup(b"foo").is_none());

        // Re-interning builds a fresh symbol, not the reclaimed one.
        let reborn = table.intern(b"foo").unwrap();
        assert!(!Arc::ptr_eq(&s1, &reborn));
        assert_eq!(reborn.refcount(), 1);
    }

    #[test]
    fn held_symbols_survive_unlink() {
        let table = small_table();
        let held = table.intern(b"held").unwrap();
        let dropped = table.intern(b"dropped").unwrap();
        dropped.decrement_refcount();
        drop(dropped);

        let safepoint = Safepoint::begin();
        assert_eq!(table.unlink(&safepoint), 1);
        let again = table.lookup(b"held").unwrap();
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[test]
    fn permanent_symbols_survive_unlink() {
        let table = small_table();
        let perm = table.intern_permanent(b"<clinit>").unwrap();
        assert!(perm.is_permanent());

        let safepoint = Safepoint::begin();
        assert_eq!(table.unlink(&safepoint), 0);
        assert!(table.lookup(b"<clinit>").is_some());
    }

    #[test]
    fn interning_an_existing_symbol_as_permanent_promotes_it() {
        let table = small_table();
        let s = table.intern(b"name").unwrap();
        let p = table.intern_permanent(b"name").unwrap();
        assert!(Arc::ptr_eq(&s, &p));
        assert!(s.is_permanent());
    }

    #[test]
    fn overlong_names_are_rejected() {
        let table = small_table();
        let name = vec![b'a'; MAX_LENGTH + 1];
        match table.intern(&name) {
            Err(InternError::NameTooLong { len }) => assert_eq!(len, MAX_LENGTH + 1),
            other => panic!("expected NameTooLong, got {:?}", other.map(|s| s.refcount())),
        }
        let exact = vec![b'a'; MAX_LENGTH];
        assert!(table.intern(&exact).is_ok());
    }

    #[test]
    fn rehash_keeps_canonical_identity() {
        let table = small_table();
        let before = table.intern(b"stable").unwrap();

        let safepoint = Safepoint::begin();
        let seed = crate::intern::new_seed();
        table
            .table
            .rehash(&safepoint, seed, &mut |s, seed| {
                crate::intern::alt_hash_bytes(seed, s.as_bytes())
            });
        drop(safepoint);

        let after = table.lookup(b"stable").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        table.verify();
    }
}
