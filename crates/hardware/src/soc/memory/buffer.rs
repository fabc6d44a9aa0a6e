//! Backing store for a node's physical memory.
//!
//! This module provides a safe wrapper around raw memory allocation for the
//! simulated physical memory. On Unix it uses anonymous `mmap`, so host pages
//! are only committed when the simulated program first touches them; physical
//! memory sizes in the gigabytes cost nothing until used.

use std::slice;

use crate::common::MemFault;

/// A bounds-checked wrapper around a raw memory buffer.
///
/// Every accessor validates the requested range and reports out-of-range
/// accesses as `MemFault::PhysicalRange` instead of panicking.
#[derive(Debug)]
pub struct DramBuffer {
    ptr: *mut u8,
    size: usize,
    is_mmap: bool,
}

impl DramBuffer {
    /// Creates a zero-filled buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::BackingAlloc` if the host refuses the mapping.
    pub fn new(size: usize) -> Result<Self, MemFault> {
        if size == 0 {
            return Err(MemFault::BackingAlloc { size: 0 });
        }

        #[cfg(unix)]
        {
            use std::ptr;
            // SAFETY: an anonymous private mapping with no address hint has no
            // preconditions; failure is reported through MAP_FAILED.
            let ptr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };

            if ptr == libc::MAP_FAILED {
                return Err(MemFault::BackingAlloc { size: size as u64 });
            }

            Ok(Self {
                ptr: ptr as *mut u8,
                size,
                is_mmap: true,
            })
        }

        #[cfg(not(unix))]
        {
            let mut vec = vec![0u8; size].into_boxed_slice();
            let ptr = vec.as_mut_ptr();
            std::mem::forget(vec);
            Ok(Self {
                ptr,
                size,
                is_mmap: false,
            })
        }
    }

    /// Returns the size of the buffer in bytes.
    pub const fn len(&self) -> usize {
        self.size
    }

    /// Returns `true` for a zero-sized buffer.
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn check(&self, offset: u64, len: usize) -> Result<usize, MemFault> {
        let fault = MemFault::PhysicalRange {
            paddr: offset,
            len,
            mem_size: self.size as u64,
        };
        let start = usize::try_from(offset).map_err(|_| fault.clone())?;
        match start.checked_add(len) {
            Some(end) if end <= self.size => Ok(start),
            _ => Err(fault),
        }
    }

    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::PhysicalRange` if the range leaves the buffer.
    pub fn read_slice(&self, offset: u64, len: usize) -> Result<&[u8], MemFault> {
        let start = self.check(offset, len)?;
        // SAFETY: `check` guarantees `[start, start + len)` lies inside the mapping,
        // which lives as long as `self`.
        Ok(unsafe { slice::from_raw_parts(self.ptr.add(start), len) })
    }

    /// Writes `data` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::PhysicalRange` if the range leaves the buffer.
    pub fn write_slice(&mut self, offset: u64, data: &[u8]) -> Result<(), MemFault> {
        let start = self.check(offset, data.len())?;
        // SAFETY: `check` guarantees the destination lies inside the mapping, and
        // `data` cannot alias it because `self` is borrowed mutably.
        unsafe {
            let dest = self.ptr.add(start);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dest, data.len());
        }
        Ok(())
    }

    /// Mutable view of `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::PhysicalRange` if the range leaves the buffer.
    pub fn slice_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8], MemFault> {
        let start = self.check(offset, len)?;
        // SAFETY: bounds checked above; the exclusive borrow of `self` makes the
        // returned slice the only live reference into the mapping.
        Ok(unsafe { slice::from_raw_parts_mut(self.ptr.add(start), len) })
    }
}

impl Drop for DramBuffer {
    /// Releases the backing memory.
    ///
    /// On Unix systems, unmaps the mmap'd memory. On other systems,
    /// reconstructs the boxed slice to trigger its destructor.
    fn drop(&mut self) {
        if self.is_mmap {
            #[cfg(unix)]
            // SAFETY: `ptr` and `size` are exactly the mapping created in `new`.
            unsafe {
                let _ = libc::munmap(self.ptr as *mut _, self.size);
            }
        } else {
            #[cfg(not(unix))]
            // SAFETY: `ptr` came from a leaked boxed slice of exactly `size` bytes.
            unsafe {
                let _ = Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.ptr, self.size));
            }
        }
    }
}
