#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: usize = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: usize = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: usize = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// log2 of the number of bytes in a page
pub const LOG_BYTES_IN_PAGE: usize = 12;
/// The number of bytes in a page
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: usize = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: usize = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// Default number of buckets in the symbol table. A prime, so entries spread
/// even under the weak primary hash.
pub const DEFAULT_SYMBOL_TABLE_SIZE: usize = 20011;

/// Default number of buckets in the string table.
pub const DEFAULT_STRING_TABLE_SIZE: usize = 1009;

/// Default bucket chain length past which a lookup flags the table for a
/// seeded rehash (possible hash flooding).
pub const DEFAULT_REHASH_CHAIN_THRESHOLD: usize = 100;
