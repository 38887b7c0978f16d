//! Raw memory management for the heap reservation and dedicated bitmap
//! storage.

use crate::util::Address;
use std::io::{Error, Result};

/// Demand-zero mmap an anonymous, read-writable area of the given size.
pub fn dzmmap(size: usize) -> Result<Address> {
    let prot = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_ANON | libc::MAP_PRIVATE | libc::MAP_NORESERVE;
    let result = unsafe { libc::mmap(std::ptr::null_mut(), size, prot, flags, -1, 0) };
    if result == libc::MAP_FAILED {
        return Err(Error::last_os_error());
    }
    Ok(Address::from_mut_ptr(result))
}

pub fn munmap(start: Address, size: usize) -> Result<()> {
    let result = unsafe { libc::munmap(start.to_mut_ptr(), size) };
    if result != 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// Zero a memory range.
pub fn zero(start: Address, len: usize) {
    unsafe {
        std::ptr::write_bytes::<u8>(start.to_mut_ptr(), 0, len);
    }
}

/// An owned anonymous mapping, unmapped on drop.
pub struct Mmap {
    start: Address,
    size: usize,
}

impl Mmap {
    pub fn new(size: usize) -> Result<Self> {
        let start = dzmmap(size)?;
        Ok(Mmap { start, size })
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        munmap(self.start, self.size).expect("munmap failed");
    }
}

// The mapping is plain anonymous memory; all concurrent access is mediated
// by the collector's own synchronization.
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}
