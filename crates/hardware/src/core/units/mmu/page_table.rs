//! Demand-paged page table.
//!
//! Virtual pages receive a physical page the first time they are touched, from
//! a counter that only ever moves forward. Entries are never reclaimed within a
//! run; the table models capacity and first-touch ordering, not a hardware walk.

use std::collections::HashMap;

use tracing::debug;

use crate::common::{MemFault, VirtAddr};

/// Mapping of one virtual page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageTableEntry {
    /// Physical page number.
    pub ppn: u64,
    /// Set once the page has been assigned.
    pub in_use: bool,
}

/// Virtual page number to physical page number map.
#[derive(Debug)]
pub struct PageTable {
    entries: HashMap<u64, PageTableEntry>,
    next_page: u64,
    page_shift: u32,
    num_pages: u64,
    mem_size: u64,
}

impl PageTable {
    /// Creates an empty page table for `mem_size` bytes of physical memory.
    ///
    /// # Arguments
    ///
    /// * `page_size` - Page size in bytes; a power of two.
    /// * `mem_size` - Physical memory size in bytes.
    pub fn new(page_size: u64, mem_size: u64) -> Self {
        Self {
            entries: HashMap::new(),
            next_page: 0,
            page_shift: page_size.trailing_zeros(),
            num_pages: mem_size >> page_size.trailing_zeros(),
            mem_size,
        }
    }

    /// Returns the physical page for `vaddr`'s page, assigning the next free
    /// physical page on first touch.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::PhysicalExhausted` if every physical page is already in use.
    pub fn resolve(&mut self, vaddr: VirtAddr) -> Result<u64, MemFault> {
        let vpn = vaddr.page_number(self.page_shift);
        if let Some(entry) = self.entries.get(&vpn) {
            return Ok(entry.ppn);
        }
        if self.next_page >= self.num_pages {
            return Err(MemFault::PhysicalExhausted {
                vaddr: vaddr.val(),
                page: self.next_page,
                mem_size: self.mem_size,
            });
        }
        let ppn = self.next_page;
        self.next_page += 1;
        let _ = self.entries.insert(vpn, PageTableEntry { ppn, in_use: true });
        debug!(vpn = format_args!("{vpn:#x}"), ppn, "assigned physical page");
        Ok(ppn)
    }

    /// Returns the entry for a virtual page number without assigning one.
    pub fn lookup(&self, vpn: u64) -> Option<PageTableEntry> {
        self.entries.get(&vpn).copied()
    }

    /// Number of physical pages handed out so far.
    pub const fn pages_assigned(&self) -> u64 {
        self.next_page
    }
}
