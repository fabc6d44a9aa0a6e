//! Address Translator.
//!
//! This module turns simulated virtual addresses into physical offsets in the
//! node's backing memory. Translation consults the TLB first; a miss checks
//! that the address lies inside a known segment and then asks the demand-paged
//! page table for the physical page.

/// Demand-paged page table.
pub mod page_table;

/// Translation Lookaside Buffer with strict LRU eviction.
pub mod tlb;

#[cfg(feature = "always-trace")]
use tracing::trace;
use tracing::debug;

use crate::common::{MemFault, PhysAddr, VirtAddr};
use crate::soc::memory::segments::SegmentRegistry;

use self::page_table::PageTable;
use self::tlb::Tlb;

/// Virtual-to-physical translator: TLB in front of a page table.
#[derive(Debug)]
pub struct Mmu {
    /// Translation cache.
    pub tlb: Tlb,
    /// Page table.
    pub page_table: PageTable,
    page_size: u64,
}

impl Mmu {
    /// Creates a translator.
    ///
    /// # Arguments
    ///
    /// * `tlb_size` - TLB capacity in entries.
    /// * `page_size` - Page size in bytes; a power of two.
    /// * `mem_size` - Physical memory size in bytes.
    pub fn new(tlb_size: usize, page_size: u64, mem_size: u64) -> Self {
        Self {
            tlb: Tlb::new(tlb_size),
            page_table: PageTable::new(page_size, mem_size),
            page_size,
        }
    }

    /// Translates a virtual address to a physical address.
    ///
    /// # Arguments
    ///
    /// * `vaddr` - The address to translate.
    /// * `segments` - Registry used to validate addresses on a TLB miss.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::SegFault` if the address is outside every allocated and
    /// thread-owned segment, or `MemFault::PhysicalExhausted` if a new page cannot
    /// be placed.
    pub fn translate(
        &mut self,
        vaddr: VirtAddr,
        segments: &SegmentRegistry,
    ) -> Result<PhysAddr, MemFault> {
        if let Some(paddr) = self.tlb.lookup(vaddr.val()) {
            #[cfg(feature = "always-trace")]
            trace!(%vaddr, %paddr, "tlb hit");
            return Ok(paddr);
        }

        if !segments.contains(vaddr.val()) {
            return Err(MemFault::SegFault { vaddr: vaddr.val() });
        }

        let ppn = self.page_table.resolve(vaddr)?;
        let paddr = PhysAddr::new(ppn * self.page_size + vaddr.page_offset(self.page_size));
        if let Some(victim) = self.tlb.insert(vaddr.val(), paddr) {
            debug!(victim = format_args!("{victim:#x}"), "tlb eviction");
        }
        debug!(%vaddr, %paddr, "tlb miss");
        Ok(paddr)
    }

    /// Number of bytes from `vaddr` to the end of its page.
    pub const fn bytes_to_page_end(&self, vaddr: VirtAddr) -> u64 {
        self.page_size - vaddr.page_offset(self.page_size)
    }

    /// Drops cached translations for addresses in `[base, top)`.
    pub fn invalidate_range(&mut self, base: u64, top: u64) {
        let dropped = self.tlb.invalidate_range(base, top);
        if dropped > 0 {
            debug!(
                base = format_args!("{base:#x}"),
                top = format_args!("{top:#x}"),
                dropped,
                "tlb range invalidated"
            );
        }
    }

    /// Page size in bytes.
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }
}
