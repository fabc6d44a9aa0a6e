//! Fault taxonomy for the simulator core.
//!
//! Every contract violation the core can detect is a named variant here. The
//! components return these errors instead of terminating; the simulator's
//! top-level handler owns the diagnostic dump and the decision to halt.
//! 1. **`MemFault`:** Segment, heap, translation and atomic-access violations.
//! 2. **`SchedError`:** Thread lifecycle violations.
//! 3. **`ConfigError`:** Configuration parsing and validation failures.
//! 4. **`SimError`:** The umbrella type returned from a tick.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::thread::{ThreadId, ThreadState};

/// A fatal memory-subsystem fault raised by the simulated program or a caller bug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemFault {
    /// The address lies outside every allocated and thread-owned segment.
    #[error("segmentation fault: virtual address {vaddr:#x} is not inside any segment")]
    SegFault {
        /// Faulting virtual address.
        vaddr: u64,
    },

    /// The heap cannot grow far enough to satisfy an allocation.
    #[error(
        "out of memory: allocating {size} bytes needs the heap to reach {needed:#x}, limit is {limit:#x}"
    )]
    OutOfMemory {
        /// Requested size in bytes.
        size: u64,
        /// Heap end the allocation would require.
        needed: u64,
        /// First address past the heap limit.
        limit: u64,
    },

    /// Thread memory slots have run into the heap.
    #[error("out of thread memory: slot at {base:#x} ({size} bytes) would overlap the heap ending at {heap_limit:#x}")]
    ThreadMemExhausted {
        /// Base the next slot would use.
        base: u64,
        /// Slot size in bytes.
        size: u64,
        /// First address past the heap limit.
        heap_limit: u64,
    },

    /// No allocated segment starts at the freed base address.
    #[error("invalid deallocation: no allocated segment starts at {base:#x} (size {size})")]
    InvalidDealloc {
        /// Base passed to the deallocation.
        base: u64,
        /// Size passed to the deallocation.
        size: u64,
    },

    /// The freed range runs past the end of its segment.
    #[error(
        "invalid deallocation: freeing {size} bytes at {base:#x} exceeds segment size {segment_size}"
    )]
    DeallocBeyondSegment {
        /// Base passed to the deallocation.
        base: u64,
        /// Size passed to the deallocation.
        size: u64,
        /// Size of the segment starting at `base`.
        segment_size: u64,
    },

    /// An allocate-at range is not fully inside a free region.
    #[error("allocation at {base:#x} ({size} bytes) is not inside a free region")]
    AllocNotFree {
        /// Requested base.
        base: u64,
        /// Requested size.
        size: u64,
    },

    /// An allocate-at range collides with a live allocated segment.
    #[error(
        "allocation at {base:#x} ({size} bytes) collides with segment {seg_base:#x}..{seg_top:#x}"
    )]
    AllocCollision {
        /// Requested base.
        base: u64,
        /// Requested size.
        size: u64,
        /// Base of the colliding segment.
        seg_base: u64,
        /// Exclusive top of the colliding segment.
        seg_top: u64,
    },

    /// A segment overlaps one already registered, a free heap region or the
    /// heap's untouched tail.
    #[error(
        "duplicate segment: {base:#x}..{top:#x} overlaps claimed range {seg_base:#x}..{seg_top:#x}"
    )]
    DuplicateSegment {
        /// Base of the new segment.
        base: u64,
        /// Exclusive top of the new segment.
        top: u64,
        /// Base of the existing segment.
        seg_base: u64,
        /// Exclusive top of the existing segment.
        seg_top: u64,
    },

    /// A segment of size zero was requested.
    #[error("empty segment requested at {base:#x}")]
    EmptySegment {
        /// Requested base.
        base: u64,
    },

    /// A segment range wraps past the top of the address space.
    #[error("segment at {base:#x} with size {size} wraps the address space")]
    AddressOverflow {
        /// Requested base.
        base: u64,
        /// Requested size.
        size: u64,
    },

    /// A rounding alignment of zero was requested.
    #[error("segment alignment must be non-zero")]
    ZeroAlignment,

    /// The heap was initialised without a static data boundary.
    #[error("cannot initialise the heap: no static data boundary is known")]
    NoStaticData,

    /// A heap operation ran before the heap was initialised.
    #[error("heap is not initialised")]
    HeapUninitialized,

    /// The page table ran out of physical pages.
    #[error("physical memory exhausted: page {page} at {vaddr:#x} exceeds {mem_size} bytes of memory")]
    PhysicalExhausted {
        /// Virtual address whose page could not be placed.
        vaddr: u64,
        /// Physical page number that would have been assigned.
        page: u64,
        /// Physical memory size in bytes.
        mem_size: u64,
    },

    /// A backend access fell outside its backing store.
    #[error("physical access {paddr:#x} ({len} bytes) is outside backing memory of {mem_size} bytes")]
    PhysicalRange {
        /// Physical address.
        paddr: u64,
        /// Access length in bytes.
        len: usize,
        /// Backing memory size in bytes.
        mem_size: u64,
    },

    /// An atomic operation with an unsupported width.
    #[error("unsupported atomic width: {0} bytes")]
    AtomicWidth(usize),

    /// An atomic operation at an address not aligned to its width.
    #[error("misaligned atomic: {vaddr:#x} is not aligned to {width} bytes")]
    MisalignedAtomic {
        /// Virtual address of the atomic.
        vaddr: u64,
        /// Access width in bytes.
        width: usize,
    },

    /// A request asked for more bytes than its target can hold.
    #[error("request of {len} bytes does not fit a target of {capacity} bytes")]
    TargetTooSmall {
        /// Requested length.
        len: usize,
        /// Target capacity.
        capacity: usize,
    },

    /// The backing store could not be allocated.
    #[error("failed to allocate {size} bytes of backing memory")]
    BackingAlloc {
        /// Requested size.
        size: u64,
    },

    /// An atomic request reached a backend without an atomic data flag.
    #[error("atomic request at {vaddr:#x} carries non-atomic flag {flag:?}")]
    NotAtomic {
        /// Virtual address of the request.
        vaddr: u64,
        /// The offending flag.
        flag: super::data::DataFlag,
    },

    /// A scratchpad operation on a node configured without one.
    #[error("no scratchpad is configured")]
    NoScratchpad,

    /// No run of free scratchpad chunks is large enough.
    #[error("scratchpad exhausted: {size} bytes need {chunks} contiguous free chunks")]
    ScratchpadExhausted {
        /// Requested size in bytes.
        size: u64,
        /// Chunks the request needs.
        chunks: u64,
    },

    /// An access or free leaves the scratchpad's address range.
    #[error("scratchpad range {addr:#x} ({len} bytes) leaves the scratchpad {base:#x}..{top:#x}")]
    ScratchpadRange {
        /// First address.
        addr: u64,
        /// Length in bytes.
        len: u64,
        /// Scratchpad base.
        base: u64,
        /// Exclusive scratchpad top.
        top: u64,
    },

    /// An access touches a scratchpad chunk that is not allocated.
    #[error("hart {hart} touched unallocated scratchpad memory at {addr:#x} ({len} bytes)")]
    ScratchpadUnallocated {
        /// Issuing hart.
        hart: usize,
        /// First address.
        addr: u64,
        /// Length in bytes.
        len: u64,
    },
}

/// A fatal thread-lifecycle violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    /// A thread reported a state change the lifecycle does not allow.
    #[error("thread {tid} on core {core}: impossible state transition {from} -> {to}")]
    ImpossibleTransition {
        /// Thread reporting the change.
        tid: ThreadId,
        /// Core that reported it.
        core: usize,
        /// Current state.
        from: ThreadState,
        /// Reported state.
        to: ThreadState,
    },

    /// A thread id that the thread table has never issued.
    #[error("unknown thread {0}")]
    UnknownThread(ThreadId),

    /// A core reported a change for a thread it does not run.
    #[error("thread {tid} is not running on core {core}")]
    NotOnCore {
        /// Thread id.
        tid: ThreadId,
        /// Reporting core.
        core: usize,
    },

    /// The number of executors does not match the configured number of cores.
    #[error("scheduler has {cores} cores but {executors} executors were supplied")]
    ExecutorCount {
        /// Configured cores.
        cores: usize,
        /// Supplied executors.
        executors: usize,
    },

    /// A thread reported an op the scheduler cannot service.
    #[error("thread {tid}: {reason}")]
    BadProgram {
        /// Thread id.
        tid: ThreadId,
        /// Human readable reason.
        reason: String,
    },
}

/// Configuration parsing and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The configuration is not valid JSON for the expected schema.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field holds a value outside its legal range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error returned from a simulator tick.
#[derive(Debug, Error)]
pub enum SimError {
    /// A memory-subsystem fault.
    #[error(transparent)]
    Mem(#[from] MemFault),

    /// A scheduling fault.
    #[error(transparent)]
    Sched(#[from] SchedError),

    /// A configuration error detected while building the simulator.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A memory dump file could not be written.
    #[error("cannot write memory dump {}: {source}", path.display())]
    Dump {
        /// File being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}
