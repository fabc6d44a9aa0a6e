//! Node Scratchpad.
//!
//! A small, directly addressed store beside main memory. Addresses in
//! `[base, base + size)` never go through segments or translation; they are
//! served here from a dedicated buffer. Space is handed out in fixed-size
//! chunks by a first-fit allocator, and every access must land entirely on
//! allocated chunks.

use tracing::debug;

use crate::common::MemFault;
use crate::config::ScratchpadConfig;
use crate::core::units::lsu::{AtomicOp, apply_atomic};

use super::buffer::DramBuffer;

/// Chunk-allocated scratchpad storage.
#[derive(Debug)]
pub struct Scratchpad {
    base: u64,
    chunk_size: u64,
    store: DramBuffer,
    used: Vec<bool>,
}

impl Scratchpad {
    /// Creates an all-free scratchpad.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::BackingAlloc` if the store cannot be allocated.
    pub fn new(config: &ScratchpadConfig) -> Result<Self, MemFault> {
        let size = usize::try_from(config.size).map_err(|_| MemFault::BackingAlloc { size: config.size })?;
        let chunks = usize::try_from(config.size / config.chunk_size.max(1))
            .map_err(|_| MemFault::BackingAlloc { size: config.size })?;
        debug!(
            base = format_args!("{:#x}", config.base),
            size = config.size,
            chunk_size = config.chunk_size,
            "scratchpad created"
        );
        Ok(Self {
            base: config.base,
            chunk_size: config.chunk_size.max(1),
            store: DramBuffer::new(size)?,
            used: vec![false; chunks],
        })
    }

    /// First scratchpad address.
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Exclusive top of the scratchpad.
    pub const fn top(&self) -> u64 {
        self.base.saturating_add(self.store.len() as u64)
    }

    /// Allocation granule in bytes.
    pub const fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Returns `true` if `addr` falls inside the scratchpad.
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.top()
    }

    /// Chunks currently allocated.
    pub fn chunks_in_use(&self) -> usize {
        self.used.iter().filter(|&&u| u).count()
    }

    /// Allocates `size` bytes on the first run of free chunks large enough.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::EmptySegment` for a zero size and
    /// `MemFault::ScratchpadExhausted` when no run fits.
    pub fn alloc(&mut self, size: u64) -> Result<u64, MemFault> {
        if size == 0 {
            return Err(MemFault::EmptySegment { base: self.base });
        }
        let chunks = size.div_ceil(self.chunk_size);
        let exhausted = MemFault::ScratchpadExhausted { size, chunks };
        let need = usize::try_from(chunks).map_err(|_| exhausted.clone())?;
        if need > self.used.len() {
            return Err(exhausted);
        }

        let mut run = 0usize;
        for idx in 0..self.used.len() {
            run = if self.used[idx] { 0 } else { run + 1 };
            if run == need {
                let first = idx + 1 - need;
                self.used[first..=idx].fill(true);
                let addr = self.base + first as u64 * self.chunk_size;
                debug!(addr = format_args!("{addr:#x}"), size, chunks, "scratchpad alloc");
                return Ok(addr);
            }
        }
        Err(exhausted)
    }

    /// Releases the chunks covering `[addr, addr + size)`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::ScratchpadRange` if the range leaves the scratchpad.
    pub fn free(&mut self, addr: u64, size: u64) -> Result<(), MemFault> {
        let len = usize::try_from(size).unwrap_or(usize::MAX);
        let (first, last) = self.chunk_span(addr, len)?;
        self.used[first..=last].fill(false);
        debug!(addr = format_args!("{addr:#x}"), size, "scratchpad free");
        Ok(())
    }

    /// Reads `len` bytes at `addr`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::ScratchpadRange` outside the scratchpad and
    /// `MemFault::ScratchpadUnallocated` if any touched chunk is free.
    pub fn read(&self, hart: usize, addr: u64, len: usize) -> Result<&[u8], MemFault> {
        self.check_allocated(hart, addr, len)?;
        self.store.read_slice(addr - self.base, len)
    }

    /// Writes `data` at `addr`.
    ///
    /// # Errors
    ///
    /// As [`Self::read`].
    pub fn write(&mut self, hart: usize, addr: u64, data: &[u8]) -> Result<(), MemFault> {
        self.check_allocated(hart, addr, data.len())?;
        self.store.write_slice(addr - self.base, data)
    }

    /// Applies `op` to the `width` bytes at `addr` and returns the old value.
    ///
    /// # Errors
    ///
    /// As [`Self::read`], plus `MemFault::AtomicWidth` for a width other than 4 or 8.
    pub fn atomic(
        &mut self,
        hart: usize,
        addr: u64,
        op: AtomicOp,
        operand: u64,
        width: usize,
    ) -> Result<u64, MemFault> {
        self.check_allocated(hart, addr, width)?;
        let cell = self.store.slice_mut(addr - self.base, width)?;
        apply_atomic(op, cell, operand)
    }

    /// The byte at `addr`, ignoring allocation; zero outside the scratchpad.
    pub fn peek(&self, addr: u64) -> u8 {
        addr.checked_sub(self.base)
            .and_then(|offset| self.store.read_slice(offset, 1).ok())
            .map_or(0, |b| b[0])
    }

    fn check_allocated(&self, hart: usize, addr: u64, len: usize) -> Result<(), MemFault> {
        let (first, last) = self.chunk_span(addr, len)?;
        if self.used[first..=last].iter().all(|&u| u) {
            Ok(())
        } else {
            Err(MemFault::ScratchpadUnallocated {
                hart,
                addr,
                len: len as u64,
            })
        }
    }

    /// Indices of the first and last chunk covering a non-empty range.
    fn chunk_span(&self, addr: u64, len: usize) -> Result<(usize, usize), MemFault> {
        let fault = MemFault::ScratchpadRange {
            addr,
            len: len as u64,
            base: self.base,
            top: self.top(),
        };
        let end = addr.checked_add(len as u64).ok_or_else(|| fault.clone())?;
        if len == 0 || addr < self.base || end > self.top() {
            return Err(fault);
        }
        let first = (addr - self.base) / self.chunk_size;
        let last = (end - 1 - self.base) / self.chunk_size;
        let to_idx = |c: u64| usize::try_from(c).map_err(|_| fault.clone());
        Ok((to_idx(first)?, to_idx(last)?))
    }
}
