//! Canonical identity under concurrency: racing interners must converge on
//! one entry per literal, and refcount-gated cleanup must never reclaim a
//! name someone still holds.

use metaspace::gc::Safepoint;
use metaspace::intern::{StringTable, Symbol, SymbolTable};
use metaspace::{Address, ObjectReference};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn racing_interners_share_one_symbol() {
    let table = SymbolTable::new(257, 100);
    let names: Vec<String> = (0..64).map(|i| format!("class/Name{}", i)).collect();

    let per_thread: Vec<Vec<Arc<Symbol>>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    names
                        .iter()
                        .map(|name| table.intern(name.as_bytes()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(table.len(), names.len());
    for (i, name) in names.iter().enumerate() {
        let canonical = &per_thread[0][i];
        assert_eq!(canonical.as_str(), Some(name.as_str()));
        for row in &per_thread[1..] {
            assert!(Arc::ptr_eq(canonical, &row[i]));
        }
        // One count per thread that interned it.
        assert_eq!(canonical.refcount(), 8);
    }
}

#[test]
fn cleanup_spares_held_names_under_churn() {
    let table = SymbolTable::new(31, 100);
    let held = table.intern(b"held/Forever").unwrap();

    for i in 0..100 {
        let transient = table.intern(format!("transient/{}", i).as_bytes()).unwrap();
        transient.decrement_refcount();
    }

    let safepoint = Safepoint::begin();
    assert_eq!(table.unlink(&safepoint), 100);
    drop(safepoint);

    assert_eq!(table.len(), 1);
    let again = table.lookup(b"held/Forever").unwrap();
    assert!(Arc::ptr_eq(&held, &again));
    assert_eq!(held.refcount(), 2);
}

#[test]
fn racing_string_interners_create_once() {
    let table = StringTable::new(257, 100);
    let created = AtomicUsize::new(0);
    let next_address = AtomicUsize::new(0x10_000);

    let results: Vec<ObjectReference> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    table.intern_str("the one literal", |_| {
                        created.fetch_add(1, Ordering::Relaxed);
                        let raw = next_address.fetch_add(16, Ordering::Relaxed);
                        ObjectReference::from_address(unsafe { Address::from_usize(raw) })
                    })
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(created.load(Ordering::Relaxed), 1);
    assert!(results.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(table.len(), 1);
}

#[test]
fn flooding_one_bucket_triggers_a_seeded_rehash() {
    // A single-bucket table makes every literal collide, as a crafted
    // flooding workload would.
    let table = SymbolTable::new(1, 50);
    let mut symbols = Vec::new();
    for i in 0..200 {
        symbols.push(table.intern(format!("flood/{}", i).as_bytes()).unwrap());
    }
    // A miss that walks the long chain flags the table.
    assert!(table.lookup(b"not/There").is_none());
    assert!(table.needs_rehash());

    let safepoint = Safepoint::begin();
    assert!(table.rehash_if_needed(&safepoint));
    assert!(!table.needs_rehash());
    drop(safepoint);

    // Identity survives the move to the seeded hash.
    for (i, sym) in symbols.iter().enumerate() {
        let again = table
            .lookup(format!("flood/{}", i).as_bytes())
            .unwrap();
        assert!(Arc::ptr_eq(sym, &again));
    }
    table.verify();
}
