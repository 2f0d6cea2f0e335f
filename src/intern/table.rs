use crate::gc::Safepoint;
use spin::Mutex;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

struct Entry<V> {
    /// Cached hash of the literal under the table's current hash function.
    hash: u32,
    value: V,
    next: AtomicPtr<Entry<V>>,
}

/// The shared skeleton of the symbol and string tables: a fixed-size bucket
/// array of singly chained entries.
///
/// The concurrency protocol, which callers must not weaken:
/// * `lookup` is lock-free. Readers walk chains through `Acquire` loads and
///   may run concurrently with each other and with `intern`.
/// * `intern` re-runs the lookup under the insert lock before linking a new
///   entry (double-checked), then publishes the fully initialized entry with
///   a `Release` store at the bucket head. A lost race returns the winner's
///   entry and discards the loser's work.
/// * `unlink`, `rehash` and `for_each_mut` take a [`Safepoint`] token:
///   entries are only ever freed or relinked while no reader can be inside
///   the table.
pub(crate) struct InternTable<V> {
    name: &'static str,
    buckets: Box<[AtomicPtr<Entry<V>>]>,
    count: AtomicUsize,
    insert_lock: Mutex<()>,
    /// Set by a lookup that walked a suspiciously long chain; consumed by
    /// the GC driver, which performs the seeded rehash at the next pause.
    needs_rehash: AtomicBool,
    seeded: AtomicBool,
    seed: AtomicU64,
    rehash_chain_threshold: usize,
}

// Entries are owned by the table and only dropped at a safepoint.
unsafe impl<V: Send> Send for InternTable<V> {}
unsafe impl<V: Send + Sync> Sync for InternTable<V> {}

impl<V> InternTable<V> {
    pub fn new(name: &'static str, buckets: usize, rehash_chain_threshold: usize) -> InternTable<V> {
        debug_assert!(buckets > 0);
        let mut table = Vec::with_capacity(buckets);
        table.resize_with(buckets, || AtomicPtr::new(ptr::null_mut()));
        InternTable {
            name,
            buckets: table.into_boxed_slice(),
            count: AtomicUsize::new(0),
            insert_lock: Mutex::new(()),
            needs_rehash: AtomicBool::new(false),
            seeded: AtomicBool::new(false),
            seed: AtomicU64::new(0),
            rehash_chain_threshold,
        }
    }

    fn bucket_index(&self, hash: u32) -> usize {
        hash as usize % self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// The alternate-hash seed, once a rehash has installed one.
    pub fn seed(&self) -> Option<u64> {
        if self.seeded.load(Ordering::Relaxed) {
            Some(self.seed.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    pub fn needs_rehash(&self) -> bool {
        self.needs_rehash.load(Ordering::Relaxed)
    }

    /// Lock-free lookup. `matches` compares literal content (the cached hash
    /// has already been compared); `found` runs on the entry while it is
    /// still chained, so a refcount taken inside it is taken before the
    /// reference escapes the table.
    pub fn lookup<R>(
        &self,
        hash: u32,
        matches: &mut dyn FnMut(&V) -> bool,
        found: &mut dyn FnMut(&V) -> R,
    ) -> Option<R> {
        let bucket = &self.buckets[self.bucket_index(hash)];
        let mut chain_len = 0;
        let mut cur = bucket.load(Ordering::Acquire);
        while !cur.is_null() {
            chain_len += 1;
            let entry = unsafe { &*cur };
            if entry.hash == hash && matches(&entry.value) {
                self.check_chain_length(chain_len);
                return Some(found(&entry.value));
            }
            cur = entry.next.load(Ordering::Acquire);
        }
        self.check_chain_length(chain_len);
        None
    }

    /// Flags the table for a seeded rehash when a walk, hit or miss, ran
    /// past the chain threshold.
    fn check_chain_length(&self, chain_len: usize) {
        if chain_len > self.rehash_chain_threshold
            && !self.seeded.load(Ordering::Relaxed)
            && !self.needs_rehash.swap(true, Ordering::Relaxed)
        {
            warn!(
                "{}: bucket chain of {} exceeds threshold {}; requesting seeded rehash",
                self.name, chain_len, self.rehash_chain_threshold
            );
        }
    }

    /// Canonicalizing insert: lookup, then double-checked insert under the
    /// table lock. `make` runs only when this thread actually inserts.
    pub fn intern<R>(
        &self,
        hash: u32,
        matches: &mut dyn FnMut(&V) -> bool,
        make: impl FnOnce() -> V,
        found: &mut dyn FnMut(&V) -> R,
    ) -> R {
        if let Some(r) = self.lookup(hash, matches, found) {
            return r;
        }
        let _guard = self.insert_lock.lock();
        // Lookups run without the lock, so absence observed above may be
        // stale: re-verify before inserting or the table ends up with two
        // canonical entries for one literal.
        if let Some(r) = self.lookup(hash, matches, found) {
            return r;
        }
        let entry = Box::into_raw(Box::new(Entry {
            hash,
            value: make(),
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        let bucket = &self.buckets[self.bucket_index(hash)];
        unsafe {
            (*entry)
                .next
                .store(bucket.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        // Publish: a reader that sees the new head sees the initialized entry.
        bucket.store(entry, Ordering::Release);
        self.count.fetch_add(1, Ordering::Relaxed);
        found(unsafe { &(*entry).value })
    }

    /// Removes and frees every entry for which `dead` returns true.
    /// Safepoint-only; returns the number of entries removed.
    pub fn unlink(&self, _safepoint: &Safepoint, dead: &mut dyn FnMut(&V) -> bool) -> usize {
        let mut removed = 0;
        for bucket in self.buckets.iter() {
            let mut prev: &AtomicPtr<Entry<V>> = bucket;
            let mut cur = prev.load(Ordering::Relaxed);
            while !cur.is_null() {
                let entry = unsafe { &*cur };
                let next = entry.next.load(Ordering::Relaxed);
                if dead(&entry.value) {
                    prev.store(next, Ordering::Relaxed);
                    drop(unsafe { Box::from_raw(cur) });
                    removed += 1;
                } else {
                    prev = &entry.next;
                }
                cur = next;
            }
        }
        self.count.fetch_sub(removed, Ordering::Relaxed);
        if removed > 0 {
            debug!("{}: unlinked {} entries", self.name, removed);
        }
        removed
    }

    /// Installs `seed` and relinks every entry under the new hash function.
    /// Entry allocations are reused; only bucket placement and the cached
    /// hash change, so canonical identity is preserved. Safepoint-only.
    pub fn rehash(&self, _safepoint: &Safepoint, seed: u64, hash_value: &mut dyn FnMut(&V, u64) -> u32) {
        let mut entries: Vec<*mut Entry<V>> = Vec::with_capacity(self.len());
        for bucket in self.buckets.iter() {
            let mut cur = bucket.swap(ptr::null_mut(), Ordering::Relaxed);
            while !cur.is_null() {
                let next = unsafe { &*cur }.next.load(Ordering::Relaxed);
                entries.push(cur);
                cur = next;
            }
        }
        info!("{}: rehashing {} entries with a fresh seed", self.name, entries.len());
        self.seed.store(seed, Ordering::Relaxed);
        self.seeded.store(true, Ordering::Relaxed);
        for &ptr in &entries {
            let entry = unsafe { &mut *ptr };
            entry.hash = hash_value(&entry.value, seed);
            let bucket = &self.buckets[self.bucket_index(entry.hash)];
            entry
                .next
                .store(bucket.load(Ordering::Relaxed), Ordering::Relaxed);
            bucket.store(ptr, Ordering::Relaxed);
        }
        self.needs_rehash.store(false, Ordering::Relaxed);
    }

    /// Visits every value mutably. Safepoint-only; used for slot adjustment
    /// during pointer fixup.
    pub fn for_each_mut(&self, _safepoint: &Safepoint, f: &mut dyn FnMut(&mut V)) {
        for bucket in self.buckets.iter() {
            let mut cur = bucket.load(Ordering::Relaxed);
            while !cur.is_null() {
                let entry = unsafe { &mut *cur };
                f(&mut entry.value);
                cur = entry.next.load(Ordering::Relaxed);
            }
        }
    }

    /// Visits every value.
    pub fn for_each(&self, f: &mut dyn FnMut(&V)) {
        for bucket in self.buckets.iter() {
            let mut cur = bucket.load(Ordering::Acquire);
            while !cur.is_null() {
                let entry = unsafe { &*cur };
                f(&entry.value);
                cur = entry.next.load(Ordering::Acquire);
            }
        }
    }

    /// Checks that every entry's cached hash matches its content and that it
    /// sits in the bucket that hash selects. A mismatch means table
    /// corruption and aborts.
    pub fn verify(&self, hash_value: &mut dyn FnMut(&V) -> u32) {
        for (index, bucket) in self.buckets.iter().enumerate() {
            let mut cur = bucket.load(Ordering::Acquire);
            while !cur.is_null() {
                let entry = unsafe { &*cur };
                let expected = hash_value(&entry.value);
                assert!(
                    entry.hash == expected,
                    "{}: entry hash {:#x} does not match content hash {:#x}",
                    self.name,
                    entry.hash,
                    expected
                );
                assert!(
                    self.bucket_index(entry.hash) == index,
                    "{}: entry hashed to bucket {} but chained in bucket {}",
                    self.name,
                    self.bucket_index(entry.hash),
                    index
                );
                cur = entry.next.load(Ordering::Acquire);
            }
        }
    }

    /// Longest chain and entry count, for diagnostics.
    pub fn chain_stats(&self) -> (usize, usize) {
        let mut max_chain = 0;
        for bucket in self.buckets.iter() {
            let mut chain = 0;
            let mut cur = bucket.load(Ordering::Acquire);
            while !cur.is_null() {
                chain += 1;
                cur = unsafe { &*cur }.next.load(Ordering::Acquire);
            }
            max_chain = std::cmp::max(max_chain, chain);
        }
        (max_chain, self.len())
    }
}

impl<V> Drop for InternTable<V> {
    fn drop(&mut self) {
        for bucket in self.buckets.iter() {
            let mut cur = bucket.load(Ordering::Relaxed);
            while !cur.is_null() {
                let next = unsafe { &*cur }.next.load(Ordering::Relaxed);
                drop(unsafe { Box::from_raw(cur) });
                cur = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> InternTable<String> {
        InternTable::new("test table", 8, 16)
    }

    fn intern_str(t: &InternTable<String>, hash: u32, s: &str) -> String {
        t.intern(
            hash,
            &mut |v| v == s,
            || s.to_string(),
            &mut |v| v.clone(),
        )
    }

    #[test]
    fn insert_then_lookup() {
        let t = table();
        assert_eq!(intern_str(&t, 7, "hello"), "hello");
        assert_eq!(t.len(), 1);
        let hit = t.lookup(7, &mut |v| v == "hello", &mut |v| v.clone());
        assert_eq!(hit.as_deref(), Some("hello"));
        assert!(t.lookup(7, &mut |v| v == "other", &mut |v| v.clone()).is_none());
    }

    #[test]
    fn intern_is_idempotent() {
        let t = table();
        intern_str(&t, 7, "a");
        intern_str(&t, 7, "a");
        assert_eq!(t.len(), 1);
        // Same bucket, different content: a chain of two.
        intern_str(&t, 15, "b");
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn long_chain_requests_rehash() {
        let t = table();
        // All in bucket 0. Chains below the threshold stay unflagged.
        for i in 0..12u32 {
            intern_str(&t, i * 8, &format!("v{}", i));
        }
        assert!(!t.needs_rehash());
        // Growing the chain past the threshold flags the table on the next
        // walk, whether from a plain lookup or an insert's lookup.
        for i in 12..40u32 {
            intern_str(&t, i * 8, &format!("v{}", i));
        }
        assert!(t.needs_rehash());
        let (max_chain, len) = t.chain_stats();
        assert_eq!((max_chain, len), (40, 40));
    }

    #[test]
    fn deep_hit_requests_rehash() {
        let t = table();
        // 17 entries in bucket 0: every insert walked at most 16 existing
        // entries, exactly the threshold, so nothing is flagged yet.
        for i in 0..17u32 {
            intern_str(&t, i * 8, &format!("v{}", i));
        }
        assert!(!t.needs_rehash());
        // The oldest entry sits at the chain's tail; finding it walks the
        // whole flooded bucket and must flag just like a miss does.
        let hit = t.lookup(0, &mut |v| v == "v0", &mut |v| v.clone());
        assert_eq!(hit.as_deref(), Some("v0"));
        assert!(t.needs_rehash());
    }

    #[test]
    fn rehash_preserves_entries() {
        let t = table();
        for i in 0..20u32 {
            intern_str(&t, i * 8, &format!("v{}", i));
        }
        let safepoint = Safepoint::begin();
        t.rehash(&safepoint, 0x5eed, &mut |v, seed| {
            crate::intern::alt_hash_bytes(seed, v.as_bytes())
        });
        assert_eq!(t.seed(), Some(0x5eed));
        assert_eq!(t.len(), 20);
        for i in 0..20u32 {
            let s = format!("v{}", i);
            let hash = crate::intern::alt_hash_bytes(0x5eed, s.as_bytes());
            assert!(t.lookup(hash, &mut |v| *v == s, &mut |_| ()).is_some());
        }
        t.verify(&mut |v| crate::intern::alt_hash_bytes(0x5eed, v.as_bytes()));
    }

    #[test]
    fn unlink_removes_only_dead() {
        let t = table();
        for i in 0..10u32 {
            intern_str(&t, i, &format!("v{}", i));
        }
        let safepoint = Safepoint::begin();
        let removed = t.unlink(&safepoint, &mut |v| v.ends_with('2') || v.ends_with('7'));
        assert_eq!(removed, 2);
        assert_eq!(t.len(), 8);
        assert!(t.lookup(2, &mut |v| v == "v2", &mut |_| ()).is_none());
        assert!(t.lookup(3, &mut |v| v == "v3", &mut |_| ()).is_some());
    }
}
