//! Physical and Virtual Address types.
//!
//! This module defines strong types for physical and virtual addresses to prevent
//! accidental mixing of address spaces. It provides the following:
//! 1. **Type Safety:** Distinguishes between virtual and physical address spaces at compile time.
//! 2. **Page Arithmetic:** Page number and page offset helpers for power-of-two page sizes.
//! 3. **Translator Integration:** Acts as the primary interface for address translation.

use std::fmt;

/// A virtual address in a simulated process address space.
///
/// Virtual addresses are issued by executors and must be translated to physical
/// addresses before a memory backend can service them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub u64);

/// A physical address inside the node's backing memory.
///
/// Physical addresses are produced by the translator from the page table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub u64);

impl VirtAddr {
    /// Creates a new virtual address from a raw 64-bit value.
    #[inline(always)]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub const fn val(&self) -> u64 {
        self.0
    }

    /// Returns the virtual page number for a page of `1 << page_shift` bytes.
    ///
    /// # Arguments
    ///
    /// * `page_shift` - log2 of the page size.
    #[inline(always)]
    pub const fn page_number(&self, page_shift: u32) -> u64 {
        self.0 >> page_shift
    }

    /// Returns the byte offset within a page of `page_size` bytes.
    ///
    /// `page_size` must be a power of two.
    #[inline(always)]
    pub const fn page_offset(&self, page_size: u64) -> u64 {
        self.0 & (page_size - 1)
    }

    /// Returns the address `bytes` further on, wrapping on overflow.
    #[inline(always)]
    pub const fn offset(&self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl PhysAddr {
    /// Creates a new physical address from a raw 64-bit value.
    #[inline(always)]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub const fn val(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
