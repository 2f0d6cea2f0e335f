use crate::util::Address;
use std::io::Result;

/// Maps `size` bytes of zeroed anonymous memory at an OS-chosen address.
/// The mapping is readable and writable; virtual-space nodes hand it out to
/// chunks without any further OS calls.
pub fn mmap_anon(size: usize) -> Result<Address> {
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE;
    let ret = unsafe { libc::mmap(std::ptr::null_mut(), size, prot, flags, -1, 0) };
    if ret == libc::MAP_FAILED {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(Address::from_mut_ptr(ret))
    }
}

/// Unmaps a region previously obtained from [`mmap_anon`].
pub fn munmap(start: Address, size: usize) -> Result<()> {
    wrap_libc_call(&|| unsafe { libc::munmap(start.to_mut_ptr(), size) }, 0)
}

/// Zeroes a memory region.
pub fn zero(start: Address, len: usize) {
    let ptr = start.to_mut_ptr();
    wrap_libc_call(&|| unsafe { libc::memset(ptr, 0, len) }, ptr).unwrap()
}

fn wrap_libc_call<T: PartialEq>(f: &dyn Fn() -> T, expect: T) -> Result<()> {
    let ret = f();
    if ret == expect {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
