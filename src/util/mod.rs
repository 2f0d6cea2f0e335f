//! Crate-wide utilities: address arithmetic, unit conversions, raw memory
//! mapping, options and logging.

pub mod address;
pub mod constants;
pub mod conversions;
pub mod logger;
pub mod memory;
pub mod options;
#[cfg(test)]
pub(crate) mod test_util;

pub use address::Address;
pub use address::ObjectReference;
pub use address::{ByteOffset, ByteSize, WordSize};
