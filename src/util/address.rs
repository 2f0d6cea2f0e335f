use bytemuck::NoUninit;

use std::fmt;
use std::ops::*;

use crate::util::constants::{BYTES_IN_WORD, LOG_BYTES_IN_WORD};

/// size in bytes
pub type ByteSize = usize;
/// offset in bytes
pub type ByteOffset = isize;
/// size in machine words
pub type WordSize = usize;

/// Address represents an arbitrary raw address. It is designed to do address
/// arithmetic mostly in a safe way and to mark the operations that cannot be
/// checked (raw loads and stores) as unsafe, while staying zero overhead both
/// memory wise and time wise.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct Address(usize);

/// Address + ByteSize (positive)
impl Add<ByteSize> for Address {
    type Output = Address;
    fn add(self, offset: ByteSize) -> Address {
        Address(self.0 + offset)
    }
}

/// Address += ByteSize (positive)
impl AddAssign<ByteSize> for Address {
    fn add_assign(&mut self, offset: ByteSize) {
        self.0 += offset;
    }
}

/// Address + ByteOffset (positive or negative)
impl Add<ByteOffset> for Address {
    type Output = Address;
    fn add(self, offset: ByteOffset) -> Address {
        Address((self.0 as isize + offset) as usize)
    }
}

/// Address - ByteSize (positive)
impl Sub<ByteSize> for Address {
    type Output = Address;
    fn sub(self, offset: ByteSize) -> Address {
        Address(self.0 - offset)
    }
}

/// Address - Address (the first address must be higher)
impl Sub<Address> for Address {
    type Output = ByteSize;
    fn sub(self, other: Address) -> ByteSize {
        debug_assert!(
            self.0 >= other.0,
            "for (addr_a - addr_b), a({}) needs to be larger than b({})",
            self,
            other
        );
        self.0 - other.0
    }
}

impl Address {
    /// The lowest possible address.
    pub const ZERO: Self = Address(0);

    /// creates Address from a pointer
    pub fn from_ptr<T>(ptr: *const T) -> Address {
        Address(ptr as usize)
    }

    /// creates Address from a mutable pointer
    pub fn from_mut_ptr<T>(ptr: *mut T) -> Address {
        Address(ptr as usize)
    }

    /// creates an Address from a numeric value
    ///
    /// # Safety
    /// The caller vouches that the value is a valid address for any
    /// subsequent raw access through it.
    pub const unsafe fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    /// the numeric value of the address
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// is this address the zero address?
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// aligns up the address to the given alignment (a power of two)
    pub const fn align_up(self, align: ByteSize) -> Address {
        debug_assert!(align.is_power_of_two());
        Address((self.0 + align - 1) & !(align - 1))
    }

    /// aligns down the address to the given alignment (a power of two)
    pub const fn align_down(self, align: ByteSize) -> Address {
        debug_assert!(align.is_power_of_two());
        Address(self.0 & !(align - 1))
    }

    /// is this address aligned to the given alignment?
    pub const fn is_aligned_to(self, align: ByteSize) -> bool {
        self.0 % align == 0
    }

    /// offsets the address by a number of words
    pub const fn add_words(self, words: WordSize) -> Address {
        Address(self.0 + (words << LOG_BYTES_IN_WORD))
    }

    /// converts the address to a const pointer
    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// converts the address to a mutable pointer
    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// loads a value of type T from the address
    ///
    /// # Safety
    /// The address must hold a valid, aligned T.
    pub unsafe fn load<T: Copy>(self) -> T {
        *(self.0 as *const T)
    }

    /// stores a value of type T to the address
    ///
    /// # Safety
    /// The address must be valid, aligned and writable.
    pub unsafe fn store<T>(self, value: T) {
        *(self.0 as *mut T) = value;
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// ObjectReference is a runtime-opaque reference to a heap object. The crate
/// never dereferences one except through the embedding runtime's
/// [`ObjectModel`](crate::gc::ObjectModel); for the intern tables and the
/// class-loader graph it is an identity plus a slot value the collector may
/// rewrite during pointer adjustment.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct ObjectReference(usize);

impl ObjectReference {
    /// The null reference.
    pub const NULL: Self = ObjectReference(0);

    /// converts the reference to its raw address
    pub const fn to_address(self) -> Address {
        Address(self.0)
    }

    /// creates an ObjectReference from a raw address
    pub const fn from_address(addr: Address) -> ObjectReference {
        ObjectReference(addr.0)
    }

    /// the numeric value of the reference
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// is this the null reference?
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// Both wrappers must stay pointer-sized: they are stored into raw slots.
const_assert_eq!(std::mem::size_of::<Address>(), BYTES_IN_WORD);
const_assert_eq!(std::mem::size_of::<ObjectReference>(), BYTES_IN_WORD);
