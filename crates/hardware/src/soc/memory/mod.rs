//! Node Memory Subsystem.
//!
//! This module ties the per-node memory state together behind one instance. It provides:
//! 1. **Segments:** The segment registry and heap allocator (`segments`).
//! 2. **Translation:** Virtual accesses go through the TLB and page table, splitting
//!    at page boundaries.
//! 3. **Exclusive access:** Load-reserve/store-conditional, atomics and exclusive futures.
//! 4. **Backends:** Local, controller-forwarded or remote-forwarded physical storage,
//!    chosen once at construction.
//! 5. **Scratchpad:** An optional chunk-allocated range served without translation.
//! 6. **Dumps:** Named ranges written to files at start-up and termination.
//!
//! Every operation runs on the single tick-processing call path, so the state
//! needs no locking.

/// Memory backend contract and the local backend.
pub mod backend;

/// DRAM buffer implementation (mmap) for raw byte storage.
pub mod buffer;

/// Timed controller backend and its latency models.
pub mod controller;

/// Remote-forwarded backend, node locality and migration messages.
pub mod remote;

/// Request descriptors and destination handles.
pub mod request;

/// Chunk-allocated scratchpad outside the translated address space.
pub mod scratchpad;

/// Segment registry and heap allocator.
pub mod segments;

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::common::constants::{PROGRAM_HEADER_SIZE, RESERVATION_FAIL, RESERVATION_OK};
use crate::common::{DataFlag, MemFault, PhysAddr, SimError, VirtAddr};
use crate::config::{DumpRange, MemoryConfig};
use crate::core::units::lsu::{AccessFlags, AmoWidth, FutureSet, ReservationTable, ScCheck};
use crate::core::units::mmu::Mmu;
use crate::core::units::mmu::tlb::Tlb;
use crate::stats::MemStats;

pub use self::backend::{LineOp, LocalBackend, MemoryBackend};
pub use self::remote::{Locality, MigrationPayload, NodeId, NodeLayout, RemoteResponse};
pub use self::request::{MemReq, Target, TargetSlice};
pub use self::scratchpad::Scratchpad;
pub use self::segments::{HeapBounds, Segment, SegmentId, SegmentKind, SegmentRegistry};

/// One physically contiguous piece of a virtual access.
#[derive(Clone, Copy, Debug)]
struct Piece {
    paddr: PhysAddr,
    offset: usize,
    len: usize,
}

/// Point in a run at which the dump ranges are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DumpStage {
    /// After the program is laid out, before the first tick.
    Init,
    /// Once every thread has terminated.
    Final,
}

impl DumpStage {
    /// File name suffix for this stage.
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Init => "dump.init",
            Self::Final => "dump.final",
        }
    }
}

/// Bytes per row in dump files.
const DUMP_BYTES_PER_LINE: usize = 16;

/// The memory subsystem of one node.
#[derive(Debug)]
pub struct Memory {
    segments: SegmentRegistry,
    mmu: Mmu,
    reservations: ReservationTable,
    futures: FutureSet,
    backend: Box<dyn MemoryBackend>,
    layout: Option<NodeLayout>,
    scratchpad: Option<Scratchpad>,
    dump_ranges: Vec<DumpRange>,
    dump_dir: PathBuf,
    stats: MemStats,
    mem_size: u64,
    stack_top: u64,
}

impl Memory {
    /// Creates the memory subsystem over `backend`.
    ///
    /// The first thread segment sits just below the program header at the top
    /// of memory.
    pub fn new(config: &MemoryConfig, backend: Box<dyn MemoryBackend>) -> Self {
        let stack_top = config.mem_size.saturating_sub(PROGRAM_HEADER_SIZE);
        info!(
            backend = backend.name(),
            mem_size = config.mem_size,
            page_size = config.page_size,
            tlb_size = config.tlb_size,
            "memory subsystem created"
        );
        Self {
            segments: SegmentRegistry::new(
                config.heap_limit(),
                config.page_size,
                config.stack_size,
                stack_top,
            ),
            mmu: Mmu::new(config.tlb_size, config.page_size, config.mem_size),
            reservations: ReservationTable::new(),
            futures: FutureSet::new(),
            backend,
            layout: None,
            scratchpad: None,
            dump_ranges: config.dump_ranges.clone(),
            dump_dir: config.dump_dir.clone(),
            stats: MemStats::default(),
            mem_size: config.mem_size,
            stack_top,
        }
    }

    /// Creates a memory subsystem backed by a local byte array, with the
    /// configured scratchpad attached.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::BackingAlloc` if either store cannot be allocated.
    pub fn local(config: &MemoryConfig) -> Result<Self, MemFault> {
        let memory = Self::new(config, Box::new(LocalBackend::new(config.mem_size)?));
        match &config.scratchpad {
            Some(pad) => Ok(memory.with_scratchpad(Scratchpad::new(pad)?)),
            None => Ok(memory),
        }
    }

    /// Attaches the node address layout used for locality decisions.
    #[must_use]
    pub const fn with_layout(mut self, layout: NodeLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Attaches a scratchpad; accesses inside its range bypass translation.
    #[must_use]
    pub fn with_scratchpad(mut self, scratchpad: Scratchpad) -> Self {
        self.scratchpad = Some(scratchpad);
        self
    }

    /// Total memory size in bytes.
    pub const fn mem_size(&self) -> u64 {
        self.mem_size
    }

    /// Exclusive top of the first thread segment.
    pub const fn stack_top(&self) -> u64 {
        self.stack_top
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The segment registry.
    pub const fn segments(&self) -> &SegmentRegistry {
        &self.segments
    }

    /// The translation cache.
    pub const fn tlb(&self) -> &Tlb {
        &self.mmu.tlb
    }

    /// The reservation table.
    pub const fn reservations(&self) -> &ReservationTable {
        &self.reservations
    }

    /// The scratchpad, if one is attached.
    pub const fn scratchpad(&self) -> Option<&Scratchpad> {
        self.scratchpad.as_ref()
    }

    // ══════════════════════════════════════════════════════════
    // Segments and heap
    // ══════════════════════════════════════════════════════════

    /// See [`SegmentRegistry::add_static_segment`].
    ///
    /// # Errors
    ///
    /// Propagates the registry's layout errors.
    pub fn add_static_segment(&mut self, base: u64, size: u64) -> Result<SegmentId, MemFault> {
        self.segments.add_static_segment(base, size)
    }

    /// See [`SegmentRegistry::add_rounded_segment`].
    ///
    /// # Errors
    ///
    /// Propagates the registry's layout errors.
    pub fn add_rounded_segment(
        &mut self,
        base: u64,
        size: u64,
        alignment: u64,
    ) -> Result<SegmentId, MemFault> {
        self.segments.add_rounded_segment(base, size, alignment)
    }

    /// Starts the heap just past `end_of_static_data`.
    ///
    /// # Errors
    ///
    /// See [`SegmentRegistry::init_heap`].
    pub fn init_heap(&mut self, end_of_static_data: u64) -> Result<HeapBounds, MemFault> {
        self.segments.init_heap(end_of_static_data)
    }

    /// Starts the heap past the highest static segment registered so far.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::NoStaticData` if no static segment exists.
    pub fn init_heap_after_static(&mut self) -> Result<HeapBounds, MemFault> {
        let end = self.segments.static_data_end();
        self.segments.init_heap(end)
    }

    /// Allocates `size` heap bytes and returns their base.
    ///
    /// # Errors
    ///
    /// See [`SegmentRegistry::allocate`].
    pub fn allocate(&mut self, size: u64) -> Result<u64, MemFault> {
        self.segments.allocate(size)
    }

    /// Allocates `size` heap bytes at `base`.
    ///
    /// # Errors
    ///
    /// See [`SegmentRegistry::allocate_at`].
    pub fn allocate_at(&mut self, base: u64, size: u64) -> Result<u64, MemFault> {
        self.segments.allocate_at(base, size)
    }

    /// Frees `size` bytes at the start of the allocated segment at `base` and
    /// drops cached translations for the freed range.
    ///
    /// # Errors
    ///
    /// See [`SegmentRegistry::deallocate`].
    pub fn deallocate(&mut self, base: u64, size: u64) -> Result<(), MemFault> {
        let freed = self.segments.deallocate(base, size)?;
        self.mmu.invalidate_range(freed.base(), freed.top());
        Ok(())
    }

    /// Records the thread-local storage template.
    pub const fn set_tls_info(&mut self, base: u64, size: u64) {
        self.segments.set_tls_info(base, size);
    }

    /// Adds a thread segment.
    ///
    /// # Errors
    ///
    /// See [`SegmentRegistry::add_thread_mem`].
    pub fn add_thread_mem(&mut self) -> Result<SegmentId, MemFault> {
        self.segments.add_thread_mem()
    }

    /// Removes a thread segment and drops cached translations inside it.
    pub fn release_thread_mem(&mut self, id: SegmentId) -> Option<Segment> {
        let seg = self.segments.release_thread_mem(id)?;
        self.mmu.invalidate_range(seg.base(), seg.top());
        Some(seg)
    }

    /// Allocates `size` scratchpad bytes and returns their address.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::NoScratchpad` when none is attached, otherwise see
    /// [`Scratchpad::alloc`].
    pub fn scratchpad_alloc(&mut self, size: u64) -> Result<u64, MemFault> {
        self.scratchpad.as_mut().ok_or(MemFault::NoScratchpad)?.alloc(size)
    }

    /// Releases `size` scratchpad bytes at `addr`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::NoScratchpad` when none is attached, otherwise see
    /// [`Scratchpad::free`].
    pub fn scratchpad_free(&mut self, addr: u64, size: u64) -> Result<(), MemFault> {
        self.scratchpad.as_mut().ok_or(MemFault::NoScratchpad)?.free(addr, size)
    }

    /// The scratchpad when `vaddr` falls inside it.
    fn scratchpad_at(&mut self, vaddr: u64) -> Option<&mut Scratchpad> {
        self.scratchpad.as_mut().filter(|pad| pad.contains(vaddr))
    }

    // ══════════════════════════════════════════════════════════
    // Translation and plain accesses
    // ══════════════════════════════════════════════════════════

    /// Translates a virtual address.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::SegFault` for an address outside every segment, or
    /// `MemFault::PhysicalExhausted` when no physical page is left.
    pub fn translate(&mut self, vaddr: u64) -> Result<PhysAddr, MemFault> {
        self.mmu.translate(VirtAddr::new(vaddr), &self.segments)
    }

    /// Translates `[vaddr, vaddr + len)` page by page.
    fn pieces(&mut self, vaddr: u64, len: usize) -> Result<Vec<Piece>, MemFault> {
        let mut pieces = Vec::with_capacity(2);
        let mut offset = 0usize;
        while offset < len {
            let va = VirtAddr::new(vaddr).offset(offset as u64);
            let paddr = self.mmu.translate(va, &self.segments)?;
            let room = usize::try_from(self.mmu.bytes_to_page_end(va)).unwrap_or(usize::MAX);
            let chunk = room.min(len - offset);
            pieces.push(Piece {
                paddr,
                offset,
                len: chunk,
            });
            offset += chunk;
        }
        if pieces.len() > 1 {
            self.stats.split_accesses += 1;
        }
        Ok(pieces)
    }

    /// Reads `len` bytes at `vaddr` into `target`.
    ///
    /// `req` completes once every page-sized piece of the access has completed;
    /// with the local backend that happens before this returns. `flag` selects how
    /// the consumer widens the value and is passed through to the backend.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::TargetTooSmall` if `target` cannot hold `len` bytes, and
    /// translation or backend faults otherwise. Nothing is issued when translation fails.
    ///
    /// # Returns
    ///
    /// `true` if the backend accepted every piece. On `false` the access must be
    /// issued again; pieces already taken complete into `target` but `req`
    /// never fires.
    pub fn read(
        &mut self,
        hart: usize,
        vaddr: u64,
        len: usize,
        target: &Target,
        req: MemReq,
        flag: DataFlag,
    ) -> Result<bool, MemFault> {
        if len > target.len() {
            return Err(MemFault::TargetTooSmall {
                len,
                capacity: target.len(),
            });
        }
        if len == 0 {
            req.complete();
            return Ok(true);
        }
        if let Some(pad) = self.scratchpad_at(vaddr) {
            target.fill(0, pad.read(hart, vaddr, len)?);
            req.complete();
            self.stats.scratchpad_accesses += 1;
            self.stats.bytes_read += len as u64;
            return Ok(true);
        }
        let pieces = self.pieces(vaddr, len)?;
        let mut accepted = true;
        for (piece, sub) in pieces.iter().zip(req.split(pieces.len())) {
            let dest = target.slice(piece.offset, piece.len);
            accepted &= self.backend.read(hart, piece.paddr, dest, sub, flag)?;
        }
        if accepted {
            self.stats.bytes_read += len as u64;
        }
        Ok(accepted)
    }

    /// Writes `data` at `vaddr`.
    ///
    /// Revokes every reservation and exclusive future overlapping the range.
    ///
    /// # Errors
    ///
    /// Translation or backend faults. Nothing is written when translation fails.
    ///
    /// # Returns
    ///
    /// `true` if the backend accepted every piece; otherwise issue it again.
    pub fn write(&mut self, hart: usize, vaddr: u64, data: &[u8], flag: DataFlag) -> Result<bool, MemFault> {
        if data.is_empty() {
            return Ok(true);
        }
        if let Some(pad) = self.scratchpad_at(vaddr) {
            pad.write(hart, vaddr, data)?;
            self.revoke_exclusive(vaddr, data.len());
            self.stats.scratchpad_accesses += 1;
            self.stats.bytes_written += data.len() as u64;
            return Ok(true);
        }
        let pieces = self.pieces(vaddr, data.len())?;
        self.revoke_exclusive(vaddr, data.len());
        let mut accepted = true;
        for piece in &pieces {
            let bytes = &data[piece.offset..piece.offset + piece.len];
            accepted &= self.backend.write(hart, piece.paddr, bytes, flag)?;
        }
        if accepted {
            self.stats.bytes_written += data.len() as u64;
        }
        Ok(accepted)
    }

    fn revoke_exclusive(&mut self, vaddr: u64, len: usize) {
        let _ = self.reservations.invalidate(vaddr, len);
        let revoked = self.futures.revoke_range(vaddr, len);
        self.stats.futures_revoked += revoked as u64;
    }

    // ══════════════════════════════════════════════════════════
    // Atomics and exclusive access
    // ══════════════════════════════════════════════════════════

    /// Issues an atomic memory operation of `target.len()` bytes at `vaddr`.
    ///
    /// The operation is taken from `flag`; the old memory value lands in
    /// `target` before `req` completes.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::AtomicWidth` unless the target is 4 or 8 bytes,
    /// `MemFault::MisalignedAtomic` for an unaligned address and
    /// `MemFault::NotAtomic` when `flag` names no atomic operation.
    pub fn amo(
        &mut self,
        hart: usize,
        vaddr: u64,
        operand: u64,
        flag: DataFlag,
        target: &Target,
        req: MemReq,
    ) -> Result<bool, MemFault> {
        let width = AmoWidth::from_bytes(target.len())?.bytes();
        if vaddr % width as u64 != 0 {
            return Err(MemFault::MisalignedAtomic { vaddr, width });
        }
        let op = flag.atomic_op().ok_or(MemFault::NotAtomic { vaddr, flag })?;
        if let Some(pad) = self.scratchpad_at(vaddr) {
            let old = pad.atomic(hart, vaddr, op, operand, width)?;
            target.fill(0, &old.to_le_bytes()[..width]);
            req.complete();
            self.revoke_exclusive(vaddr, width);
            self.stats.scratchpad_accesses += 1;
            self.stats.amos += 1;
            self.stats.bytes_read += width as u64;
            self.stats.bytes_written += width as u64;
            return Ok(true);
        }
        let paddr = self.translate(vaddr)?;
        self.revoke_exclusive(vaddr, width);
        let accepted = self.backend.amo(hart, paddr, op, operand, target.slice(0, width), req)?;
        if accepted {
            self.stats.amos += 1;
            self.stats.bytes_read += width as u64;
            self.stats.bytes_written += width as u64;
        }
        Ok(accepted)
    }

    /// Load-reserve of `target.len()` bytes at `vaddr`.
    ///
    /// If any hart already holds a reservation on `vaddr` the conflict marker is
    /// written into `target`, `req` completes at once and nothing is read.
    ///
    /// # Errors
    ///
    /// Translation or backend faults; the reservation is dropped again if the
    /// read cannot be issued.
    ///
    /// # Returns
    ///
    /// `true` if the reservation was registered. `false` with `req` completed
    /// reports a conflict; `false` with `req` pending means the backend refused
    /// the read and nothing is held.
    pub fn load_reserve(
        &mut self,
        hart: usize,
        vaddr: u64,
        target: &Target,
        flags: AccessFlags,
        req: MemReq,
        flag: DataFlag,
    ) -> Result<bool, MemFault> {
        let len = target.len();
        if !self.reservations.reserve(hart, vaddr, len, flags, target) {
            self.stats.reservation_conflicts += 1;
            req.complete();
            return Ok(false);
        }
        match self.read(hart, vaddr, len, target, req, flag) {
            Ok(true) => {
                self.stats.reservations += 1;
                Ok(true)
            }
            Ok(false) => {
                let _ = self.reservations.consume(hart, vaddr);
                Ok(false)
            }
            Err(fault) => {
                let _ = self.reservations.consume(hart, vaddr);
                Err(fault)
            }
        }
    }

    /// Store-conditional of the low `len` bytes of `data` at `vaddr`.
    ///
    /// Succeeds only when `hart` holds the reservation on `vaddr` and the reserved
    /// value ANDed with `data` is non-zero. On success the reservation is consumed
    /// and the store performed; a mismatch leaves the reservation in place. The
    /// status (`RESERVATION_OK` or `RESERVATION_FAIL`) is written into `target`.
    ///
    /// # Errors
    ///
    /// Translation or backend faults from the store.
    pub fn store_conditional(
        &mut self,
        hart: usize,
        vaddr: u64,
        data: u64,
        len: usize,
        target: &Target,
        flags: AccessFlags,
    ) -> Result<bool, MemFault> {
        match self.reservations.check(hart, vaddr, data) {
            ScCheck::Match => {
                let _ = self.reservations.consume(hart, vaddr);
                let bytes = data.to_le_bytes();
                let n = len.min(bytes.len());
                let _ = self.write(hart, vaddr, &bytes[..n], DataFlag::None)?;
                target.set_value(RESERVATION_OK);
                self.stats.sc_successes += 1;
                debug!(hart, vaddr = format_args!("{vaddr:#x}"), flags = flags.bits(), "store-conditional succeeded");
                Ok(true)
            }
            outcome => {
                target.set_value(RESERVATION_FAIL);
                self.stats.sc_failures += 1;
                debug!(hart, vaddr = format_args!("{vaddr:#x}"), ?outcome, "store-conditional failed");
                Ok(false)
            }
        }
    }

    /// Marks `vaddr` with an exclusive future.
    pub fn set_future(&mut self, vaddr: u64) -> bool {
        self.futures.set(vaddr)
    }

    /// Clears the exclusive future on `vaddr`.
    pub fn revoke_future(&mut self, vaddr: u64) -> bool {
        self.futures.revoke(vaddr)
    }

    /// Returns `true` if `vaddr` carries an exclusive future.
    pub fn status_future(&self, vaddr: u64) -> bool {
        self.futures.status(vaddr)
    }

    // ══════════════════════════════════════════════════════════
    // Maintenance
    // ══════════════════════════════════════════════════════════

    /// Orders earlier requests of `hart` before later ones.
    ///
    /// # Returns
    ///
    /// `false` if the backend cannot accept the fence yet; retry on a later tick.
    pub fn fence(&mut self, hart: usize) -> bool {
        self.backend.fence(hart)
    }

    /// Flushes the cache line holding `vaddr`.
    ///
    /// # Errors
    ///
    /// Translation faults.
    pub fn flush_line(&mut self, hart: usize, vaddr: u64) -> Result<bool, MemFault> {
        self.line_op(hart, vaddr, LineOp::Flush)
    }

    /// Invalidates the cache line holding `vaddr`.
    ///
    /// # Errors
    ///
    /// Translation faults.
    pub fn invalidate_line(&mut self, hart: usize, vaddr: u64) -> Result<bool, MemFault> {
        self.line_op(hart, vaddr, LineOp::Invalidate)
    }

    /// Cleans the cache line holding `vaddr`.
    ///
    /// # Errors
    ///
    /// Translation faults.
    pub fn clean_line(&mut self, hart: usize, vaddr: u64) -> Result<bool, MemFault> {
        self.line_op(hart, vaddr, LineOp::Clean)
    }

    fn line_op(&mut self, hart: usize, vaddr: u64, op: LineOp) -> Result<bool, MemFault> {
        let paddr = self.translate(vaddr)?;
        Ok(self.backend.line_op(hart, paddr, op))
    }

    /// Drops every cached translation.
    pub fn flush_tlb(&mut self) {
        self.mmu.tlb.flush();
    }

    // ══════════════════════════════════════════════════════════
    // Backend events and remote fabric
    // ══════════════════════════════════════════════════════════

    /// Advances the backend to `cycle`.
    ///
    /// # Errors
    ///
    /// Faults raised while retiring requests.
    pub fn tick(&mut self, cycle: u64) -> Result<(), MemFault> {
        self.backend.tick(cycle)
    }

    /// Requests issued but not yet completed.
    pub fn outstanding(&self) -> usize {
        self.backend.outstanding()
    }

    /// Folds an inbound remote response into its request.
    pub fn handle_remote_response(&mut self, resp: RemoteResponse) -> bool {
        self.backend.handle_response(resp)
    }

    /// Where `vaddr` lives relative to this node.
    pub fn locality(&self, vaddr: u64) -> Locality {
        self.layout.map_or(Locality::Local, |layout| layout.locality(vaddr))
    }

    /// This node's identity, if it sits on a remote fabric.
    pub fn node(&self) -> Option<NodeId> {
        self.backend.node()
    }

    /// Ships a thread to `dest`.
    ///
    /// # Returns
    ///
    /// `false` if the backend has no fabric to send it on.
    pub fn migrate(&mut self, payload: MigrationPayload, dest: NodeId) -> bool {
        self.backend.migrate(payload, dest)
    }

    /// ORs `mask` into the eight bytes at physical `offset`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::PhysicalRange` if the bytes leave backing memory.
    pub fn inject_fault(&mut self, offset: u64, mask: u64) -> Result<bool, MemFault> {
        let landed = self.backend.inject_fault(offset, mask)?;
        if landed {
            self.stats.faults_injected += 1;
        }
        Ok(landed)
    }

    // ══════════════════════════════════════════════════════════
    // Statistics and diagnostics
    // ══════════════════════════════════════════════════════════

    /// Snapshot of the memory counters.
    pub fn stats(&self) -> MemStats {
        MemStats {
            tlb_hits: self.mmu.tlb.hits(),
            tlb_misses: self.mmu.tlb.misses(),
            pages_assigned: self.mmu.page_table.pages_assigned(),
            ..self.stats
        }
    }

    /// Lists every segment as `base, top, size`.
    pub fn dump_segments(&self) -> String {
        self.segments.dump()
    }

    /// Writes every configured dump range to `{dump_dir}/{name}.{suffix}`.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Dump` naming the first file that cannot be written.
    ///
    /// # Returns
    ///
    /// The paths written, in configuration order.
    pub fn write_dumps(&self, stage: DumpStage) -> Result<Vec<PathBuf>, SimError> {
        let mut written = Vec::with_capacity(self.dump_ranges.len());
        for range in &self.dump_ranges {
            let path = self.dump_dir.join(format!("{}.{}", range.name, stage.suffix()));
            let text = self.dump_memory(range.base, range.size, DUMP_BYTES_PER_LINE);
            fs::write(&path, text).map_err(|source| SimError::Dump {
                path: path.clone(),
                source,
            })?;
            info!(range = %range.name, path = %path.display(), "memory dump written");
            written.push(path);
        }
        Ok(written)
    }

    /// Hex dump of `[base, base + size)` with `bytes_per_line` bytes per row.
    ///
    /// Reads backing memory directly without touching the TLB or assigning pages.
    /// Untouched pages show as zero; bytes the backend does not hold locally show
    /// as `??`. Scratchpad addresses read the scratchpad store whether allocated or not.
    pub fn dump_memory(&self, base: u64, size: u64, bytes_per_line: usize) -> String {
        let per_line = bytes_per_line.max(1) as u64;
        let shift = self.mmu.page_size().trailing_zeros();
        let page_size = self.mmu.page_size();
        let mut out = String::new();
        let top = base.saturating_add(size);
        let mut line = base;
        while line < top {
            let _ = write!(out, "{line:#018x}:");
            let end = line.saturating_add(per_line).min(top);
            for addr in line..end {
                let va = VirtAddr::new(addr);
                let on_pad = self.scratchpad.as_ref().filter(|pad| pad.contains(addr));
                let byte = match on_pad {
                    Some(pad) => Some(pad.peek(addr)),
                    None => self.peek_translated(va, shift, page_size),
                };
                match byte {
                    Some(b) => {
                        let _ = write!(out, " {b:02x}");
                    }
                    None => out.push_str(" ??"),
                }
            }
            out.push('\n');
            line = end;
        }
        out
    }

    fn peek_translated(&self, va: VirtAddr, shift: u32, page_size: u64) -> Option<u8> {
        match self.mmu.page_table.lookup(va.page_number(shift)) {
            Some(entry) => {
                let paddr = PhysAddr::new(entry.ppn * page_size + va.page_offset(page_size));
                self.backend.peek(paddr, 1).and_then(|b| b.first().copied())
            }
            None => Some(0),
        }
    }
}
