//! Canonicalizing intern tables for names (symbols) and string literals.
//!
//! Lookups are lock-free and may run concurrently with each other and with
//! insertions; insertions double-check under a per-table lock; structural
//! mutation (unlinking dead entries, rehashing with a fresh seed) happens
//! only at a safepoint.

mod table;

pub mod string_table;
pub mod symbol;
pub mod symbol_table;

pub use string_table::StringTable;
pub use symbol::{Symbol, MAX_LENGTH, PERM_REFCOUNT};
pub use symbol_table::SymbolTable;

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// An interning failure. Races between concurrent interners are not errors;
/// the only way to be refused is to present an unrepresentable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternError {
    /// The byte sequence exceeds [`MAX_LENGTH`]. Names are rejected
    /// outright, never truncated.
    NameTooLong { len: usize },
}

impl fmt::Display for InternError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InternError::NameTooLong { len } => {
                write!(f, "name of {} bytes exceeds the maximum symbol length", len)
            }
        }
    }
}

impl std::error::Error for InternError {}

/// The primary (unseeded) content hash: the classic `h * 31 + unit` rolled
/// over the sequence. Cheap and stable, but predictable, which is why the
/// tables can fall back to the seeded alternate below under flooding.
pub(crate) fn primary_hash_bytes(bytes: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for b in bytes {
        h = h.wrapping_mul(31).wrapping_add(*b as u32);
    }
    h
}

pub(crate) fn primary_hash_chars(chars: &[u16]) -> u32 {
    let mut h: u32 = 0;
    for c in chars {
        h = h.wrapping_mul(31).wrapping_add(*c as u32);
    }
    h
}

/// The seeded alternate hash (murmur3 x86_32). Used after a rehash so bucket
/// placement is no longer predictable from content alone.
pub(crate) fn alt_hash_bytes(seed: u64, bytes: &[u8]) -> u32 {
    murmur3_32(seed as u32 ^ (seed >> 32) as u32, bytes)
}

pub(crate) fn alt_hash_chars(seed: u64, chars: &[u16]) -> u32 {
    let mut h = seed as u32 ^ (seed >> 32) as u32;
    for c in chars {
        h = murmur3_round(h, *c as u32);
    }
    murmur3_fmix(h ^ (chars.len() as u32 * 2))
}

fn murmur3_round(h: u32, mut k: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;
    k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
    (h ^ k).rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64)
}

fn murmur3_fmix(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}

fn murmur3_32(seed: u32, data: &[u8]) -> u32 {
    let mut h = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h = murmur3_round(h, k);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k: u32 = 0;
        for (i, b) in tail.iter().enumerate() {
            k |= (*b as u32) << (8 * i);
        }
        const C1: u32 = 0xcc9e_2d51;
        const C2: u32 = 0x1b87_3593;
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }
    murmur3_fmix(h ^ data.len() as u32)
}

lazy_static! {
    static ref SEED_STATE: RandomState = RandomState::new();
}

static SEED_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh, unpredictable hash seed for a table rehash.
pub(crate) fn new_seed() -> u64 {
    let mut hasher = SEED_STATE.build_hasher();
    hasher.write_u64(SEED_COUNTER.fetch_add(1, Ordering::Relaxed));
    hasher.finish()
}
