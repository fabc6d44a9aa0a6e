//! Memory Backend interface and the local backend.
//!
//! A node services physical accesses through exactly one backend, chosen at
//! construction. Every backend accepts the same requests; they differ only in
//! when the completion descriptor fires:
//! 1. **Local:** Synchronously, inside the call, from a local byte array.
//! 2. **Controller:** When the timed controller retires the request on a later tick.
//! 3. **Remote:** When the correlated response arrives from the remote node.

use crate::common::{DataFlag, MemFault, PhysAddr};
use crate::core::units::lsu::atomic::{AtomicOp, apply_atomic};

use super::buffer::DramBuffer;
use super::remote::{MigrationPayload, NodeId, RemoteResponse};
use super::request::{MemReq, TargetSlice};

/// Cache-line maintenance operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineOp {
    /// Write back and invalidate.
    Flush,
    /// Invalidate without write-back.
    Invalidate,
    /// Write back, keep the line.
    Clean,
}

/// Contract shared by every memory backend.
///
/// Accepting methods return `Ok(true)` when the request was taken. A read or
/// atomic must complete its descriptor exactly once, either before returning
/// or from a later `tick`/`handle_response`. `Ok(false)` means nothing was
/// taken and the descriptor was dropped without completing; the issuer retries
/// the whole access on a later tick.
pub trait MemoryBackend: std::fmt::Debug {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// Bytes of physical memory behind this backend.
    fn capacity(&self) -> u64;

    /// Reads `dest.len()` bytes at `paddr` into `dest`, then completes `req`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::PhysicalRange` for accesses outside the backing store.
    fn read(
        &mut self,
        hart: usize,
        paddr: PhysAddr,
        dest: TargetSlice,
        req: MemReq,
        flags: DataFlag,
    ) -> Result<bool, MemFault>;

    /// Writes `data` at `paddr`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::PhysicalRange` for accesses outside the backing store.
    fn write(
        &mut self,
        hart: usize,
        paddr: PhysAddr,
        data: &[u8],
        flags: DataFlag,
    ) -> Result<bool, MemFault>;

    /// Applies `op` with `operand` to the `dest.len()` bytes at `paddr`, leaving
    /// the old value in `dest`, then completes `req`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::PhysicalRange` or `MemFault::AtomicWidth`.
    fn amo(
        &mut self,
        hart: usize,
        paddr: PhysAddr,
        op: AtomicOp,
        operand: u64,
        dest: TargetSlice,
        req: MemReq,
    ) -> Result<bool, MemFault>;

    /// Orders all earlier requests of `hart` before later ones.
    fn fence(&mut self, _hart: usize) -> bool {
        true
    }

    /// Performs a cache-line maintenance operation on the line holding `paddr`.
    fn line_op(&mut self, _hart: usize, _paddr: PhysAddr, _op: LineOp) -> bool {
        true
    }

    /// Advances backend time, retiring whatever is due.
    ///
    /// # Errors
    ///
    /// Propagates faults raised while servicing retired requests.
    fn tick(&mut self, _cycle: u64) -> Result<(), MemFault> {
        Ok(())
    }

    /// Requests accepted but not yet completed.
    fn outstanding(&self) -> usize {
        0
    }

    /// Folds an inbound remote response back into its request.
    ///
    /// # Returns
    ///
    /// `true` if the response matched an in-flight request.
    fn handle_response(&mut self, _resp: RemoteResponse) -> bool {
        false
    }

    /// Ships a thread's state to another node.
    ///
    /// # Returns
    ///
    /// `true` if the payload was sent; backends without a link refuse.
    fn migrate(&mut self, _payload: MigrationPayload, _dest: NodeId) -> bool {
        false
    }

    /// Identity of this node on the remote fabric, for backends that have one.
    fn node(&self) -> Option<NodeId> {
        None
    }

    /// ORs `mask` into the eight bytes at physical `offset`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::PhysicalRange` if the eight bytes leave the store.
    ///
    /// # Returns
    ///
    /// `true` if the fault landed in locally held memory.
    fn inject_fault(&mut self, _offset: u64, _mask: u64) -> Result<bool, MemFault> {
        Ok(false)
    }

    /// Copies bytes out of locally held memory without side effects.
    fn peek(&self, _paddr: PhysAddr, _len: usize) -> Option<Vec<u8>> {
        None
    }
}

/// Backend servicing every access synchronously from a local byte array.
#[derive(Debug)]
pub struct LocalBackend {
    store: DramBuffer,
}

impl LocalBackend {
    /// Creates a backend over `mem_size` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::BackingAlloc` if the store cannot be allocated.
    pub fn new(mem_size: u64) -> Result<Self, MemFault> {
        let size = usize::try_from(mem_size).map_err(|_| MemFault::BackingAlloc { size: mem_size })?;
        Ok(Self {
            store: DramBuffer::new(size)?,
        })
    }
}

impl MemoryBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn capacity(&self) -> u64 {
        self.store.len() as u64
    }

    fn read(
        &mut self,
        _hart: usize,
        paddr: PhysAddr,
        dest: TargetSlice,
        req: MemReq,
        _flags: DataFlag,
    ) -> Result<bool, MemFault> {
        dest.fill(self.store.read_slice(paddr.val(), dest.len())?);
        req.complete();
        Ok(true)
    }

    fn write(
        &mut self,
        _hart: usize,
        paddr: PhysAddr,
        data: &[u8],
        _flags: DataFlag,
    ) -> Result<bool, MemFault> {
        self.store.write_slice(paddr.val(), data)?;
        Ok(true)
    }

    fn amo(
        &mut self,
        _hart: usize,
        paddr: PhysAddr,
        op: AtomicOp,
        operand: u64,
        dest: TargetSlice,
        req: MemReq,
    ) -> Result<bool, MemFault> {
        let cell = self.store.slice_mut(paddr.val(), dest.len())?;
        let old = apply_atomic(op, cell, operand)?;
        dest.fill(&old.to_le_bytes());
        req.complete();
        Ok(true)
    }

    fn inject_fault(&mut self, offset: u64, mask: u64) -> Result<bool, MemFault> {
        let cell = self.store.slice_mut(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(cell);
        cell.copy_from_slice(&(u64::from_le_bytes(raw) | mask).to_le_bytes());
        Ok(true)
    }

    fn peek(&self, paddr: PhysAddr, len: usize) -> Option<Vec<u8>> {
        self.store.read_slice(paddr.val(), len).ok().map(<[u8]>::to_vec)
    }
}
