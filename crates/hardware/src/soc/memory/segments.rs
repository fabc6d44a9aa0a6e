//! Segment Registry and Heap Allocator.
//!
//! The registry is the sole owner of every address-space region. Segments live
//! in an arena keyed by `SegmentId`; three ordered indexes (allocated, free and
//! thread-owned, each keyed by base address) refer to them by id only.
//!
//! Address ranges are half-open: a segment covers `[base, base + size)` and its
//! top address is `base + size`.
//!
//! The heap occupies `[start, limit)`. Memory below `end` has been handed out at
//! least once and is either allocated or on the free list; `[end, limit)` is the
//! untouched tail the heap grows into. Thread-owned segments are stacked
//! downward from the initial stack top, one guard page apart.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Write as _};

use tracing::{debug, info};

use crate::common::MemFault;

/// Opaque handle of a segment in the registry's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(u32);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg{}", self.0)
    }
}

/// Collection a segment belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Program, static or heap-allocated memory.
    Allocated,
    /// Reclaimed heap memory.
    Free,
    /// A thread's stack and thread-local area.
    Thread,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allocated => "allocated",
            Self::Free => "free",
            Self::Thread => "thread",
        })
    }
}

/// A contiguous address range `[base, base + size)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    base: u64,
    size: u64,
}

impl Segment {
    /// Creates a segment.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::EmptySegment` for a zero size and
    /// `MemFault::AddressOverflow` if the range wraps the address space.
    pub const fn new(base: u64, size: u64) -> Result<Self, MemFault> {
        if size == 0 {
            return Err(MemFault::EmptySegment { base });
        }
        if base.checked_add(size).is_none() {
            return Err(MemFault::AddressOverflow { base, size });
        }
        Ok(Self { base, size })
    }

    /// First address of the segment.
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Size in bytes.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Exclusive upper bound, `base + size`.
    pub const fn top(&self) -> u64 {
        self.base + self.size
    }

    /// Returns `true` if `addr` lies inside the segment.
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.top()
    }

    /// Returns `true` if `[base, top)` lies entirely inside the segment.
    pub const fn covers(&self, base: u64, top: u64) -> bool {
        base >= self.base && top <= self.top()
    }

    /// Returns `true` if `[base, top)` shares at least one address with the segment.
    pub const fn overlaps(&self, base: u64, top: u64) -> bool {
        base < self.top() && self.base < top
    }
}

/// Heap bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapBounds {
    /// First heap address.
    pub start: u64,
    /// First address never handed out.
    pub end: u64,
    /// Exclusive upper bound of heap growth.
    pub limit: u64,
}

/// Thread-local storage template recorded by the loader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TlsInfo {
    /// Address of the TLS template.
    pub base: u64,
    /// Size of the TLS area in bytes.
    pub size: u64,
}

/// Owner of every segment of one simulated address space.
#[derive(Debug)]
pub struct SegmentRegistry {
    arena: HashMap<SegmentId, (SegmentKind, Segment)>,
    allocated: BTreeMap<u64, SegmentId>,
    free: BTreeMap<u64, SegmentId>,
    threads: BTreeMap<u64, SegmentId>,
    next_id: u32,
    heap: Option<HeapBounds>,
    max_heap_size: u64,
    page_size: u64,
    stack_size: u64,
    tls: TlsInfo,
    next_thread_top: u64,
}

impl SegmentRegistry {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `max_heap_size` - Largest size the heap may grow to.
    /// * `page_size` - Guard gap left between thread segments.
    /// * `stack_size` - Stack bytes in every thread segment.
    /// * `stack_top` - Exclusive top of the first thread segment.
    pub fn new(max_heap_size: u64, page_size: u64, stack_size: u64, stack_top: u64) -> Self {
        Self {
            arena: HashMap::new(),
            allocated: BTreeMap::new(),
            free: BTreeMap::new(),
            threads: BTreeMap::new(),
            next_id: 0,
            heap: None,
            max_heap_size,
            page_size,
            stack_size,
            tls: TlsInfo::default(),
            next_thread_top: stack_top,
        }
    }

    // ══════════════════════════════════════════════════════════
    // Static layout
    // ══════════════════════════════════════════════════════════

    /// Registers a fixed region such as a loaded program section.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::DuplicateSegment` if the range overlaps an allocated,
    /// free or thread segment or the heap's untouched tail, or the
    /// `Segment::new` errors for an empty or wrapping range.
    pub fn add_static_segment(&mut self, base: u64, size: u64) -> Result<SegmentId, MemFault> {
        let seg = Segment::new(base, size)?;
        if let Some((_, existing)) = self.first_overlap(&self.allocated, seg.base, seg.top()) {
            return Err(duplicate(seg, existing));
        }
        if let Some(existing) = self.reserved_overlap(seg.base, seg.top()) {
            return Err(duplicate(seg, existing));
        }
        let id = self.insert(SegmentKind::Allocated, seg)?;
        debug!(%id, base = format_args!("{base:#x}"), size, "static segment added");
        Ok(id)
    }

    /// Registers a region whose size is rounded up to `alignment`.
    ///
    /// An allocated segment that already overlaps the rounded range is expanded
    /// in place to cover it; several overlapping segments are fused into one.
    /// Otherwise a new segment is inserted. Free, thread-owned and untouched
    /// heap memory is never absorbed.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::ZeroAlignment` for a zero alignment,
    /// `MemFault::DuplicateSegment` if the rounded range meets a free or thread
    /// segment or the heap's untouched tail, or the `Segment::new` errors for an
    /// empty or wrapping range.
    pub fn add_rounded_segment(
        &mut self,
        base: u64,
        size: u64,
        alignment: u64,
    ) -> Result<SegmentId, MemFault> {
        if alignment == 0 {
            return Err(MemFault::ZeroAlignment);
        }
        let rounded = size
            .checked_next_multiple_of(alignment)
            .ok_or(MemFault::AddressOverflow { base, size })?;
        let seg = Segment::new(base, rounded)?;
        if let Some(existing) = self.reserved_overlap(seg.base, seg.top()) {
            return Err(duplicate(seg, existing));
        }

        let overlapping: Vec<(SegmentId, Segment)> = self
            .allocated
            .values()
            .filter_map(|id| self.arena.get(id).map(|(_, s)| (*id, *s)))
            .filter(|(_, s)| s.overlaps(seg.base, seg.top()))
            .collect();

        let Some(&(keep, _)) = overlapping.first() else {
            let id = self.insert(SegmentKind::Allocated, seg)?;
            debug!(%id, base = format_args!("{base:#x}"), size = rounded, "rounded segment added");
            return Ok(id);
        };

        let lo = overlapping.iter().map(|(_, s)| s.base).fold(seg.base, u64::min);
        let hi = overlapping.iter().map(|(_, s)| s.top()).fold(seg.top(), u64::max);
        for &(id, _) in &overlapping[1..] {
            let _ = self.remove(id);
        }
        self.resize(keep, Segment::new(lo, hi - lo)?);
        debug!(
            id = %keep,
            base = format_args!("{lo:#x}"),
            top = format_args!("{hi:#x}"),
            "segment expanded in place"
        );
        Ok(keep)
    }

    // ══════════════════════════════════════════════════════════
    // Heap
    // ══════════════════════════════════════════════════════════

    /// Establishes the heap just past the static data.
    ///
    /// # Arguments
    ///
    /// * `end_of_static_data` - Exclusive top of the last static segment.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::NoStaticData` if the boundary is zero, and
    /// `MemFault::OutOfMemory` if the heap would run into thread memory or wrap.
    pub fn init_heap(&mut self, end_of_static_data: u64) -> Result<HeapBounds, MemFault> {
        if end_of_static_data == 0 {
            return Err(MemFault::NoStaticData);
        }
        let start = end_of_static_data;
        let limit = start
            .checked_add(self.max_heap_size)
            .ok_or(MemFault::AddressOverflow {
                base: start,
                size: self.max_heap_size,
            })?;
        match self.lowest_thread_base() {
            Some(lowest) if limit > lowest => {
                return Err(MemFault::OutOfMemory {
                    size: self.max_heap_size,
                    needed: limit,
                    limit: lowest,
                });
            }
            _ => {}
        }
        let bounds = HeapBounds {
            start,
            end: start,
            limit,
        };
        self.heap = Some(bounds);
        info!(
            start = format_args!("{start:#x}"),
            limit = format_args!("{limit:#x}"),
            "heap initialised"
        );
        Ok(bounds)
    }

    /// Allocates `size` bytes, preferring the lowest free region that fits.
    ///
    /// An exact fit consumes the free region; a larger one is shrunk from its low
    /// end. With no fit, the heap grows by `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::HeapUninitialized` before `init_heap`,
    /// `MemFault::EmptySegment` for a zero size, `MemFault::OutOfMemory` if
    /// growth would pass the heap limit and `MemFault::AllocCollision` if the
    /// grown range meets an allocated or thread segment.
    pub fn allocate(&mut self, size: u64) -> Result<u64, MemFault> {
        let mut heap = self.heap.ok_or(MemFault::HeapUninitialized)?;
        if size == 0 {
            return Err(MemFault::EmptySegment { base: heap.end });
        }

        let fit = self
            .free
            .values()
            .filter_map(|id| self.arena.get(id).map(|(_, s)| (*id, *s)))
            .find(|(_, s)| s.size >= size);

        let base = match fit {
            Some((free_id, free_seg)) if free_seg.size == size => {
                let _ = self.remove(free_id);
                free_seg.base
            }
            Some((free_id, free_seg)) => {
                self.resize(free_id, Segment::new(free_seg.base + size, free_seg.size - size)?);
                free_seg.base
            }
            None => {
                let needed = heap.end.checked_add(size).unwrap_or(u64::MAX);
                if needed > heap.limit {
                    return Err(MemFault::OutOfMemory {
                        size,
                        needed,
                        limit: heap.limit,
                    });
                }
                let base = heap.end;
                let hit = self
                    .first_overlap(&self.allocated, base, needed)
                    .or_else(|| self.first_overlap(&self.threads, base, needed));
                if let Some((_, hit)) = hit {
                    return Err(MemFault::AllocCollision {
                        base,
                        size,
                        seg_base: hit.base,
                        seg_top: hit.top(),
                    });
                }
                heap.end = needed;
                self.heap = Some(heap);
                base
            }
        };

        let id = self.insert(SegmentKind::Allocated, Segment::new(base, size)?)?;
        debug!(%id, base = format_args!("{base:#x}"), size, "heap allocation");
        Ok(base)
    }

    /// Allocates `[base, base + size)` exactly.
    ///
    /// The range must lie inside one free region, which is split into the parts
    /// before and after it, or inside the heap's untouched tail, in which case
    /// any gap below `base` joins the free list.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::AllocCollision` if the range overlaps an allocated
    /// segment and `MemFault::AllocNotFree` if it is not inside free memory.
    pub fn allocate_at(&mut self, base: u64, size: u64) -> Result<u64, MemFault> {
        let seg = Segment::new(base, size)?;
        let top = seg.top();
        if let Some((_, hit)) = self.first_overlap(&self.allocated, base, top) {
            return Err(MemFault::AllocCollision {
                base,
                size,
                seg_base: hit.base,
                seg_top: hit.top(),
            });
        }
        if let Some((_, hit)) = self.first_overlap(&self.threads, base, top) {
            return Err(MemFault::AllocCollision {
                base,
                size,
                seg_base: hit.base,
                seg_top: hit.top(),
            });
        }

        let containing = self
            .free
            .values()
            .filter_map(|id| self.arena.get(id).map(|(_, s)| (*id, *s)))
            .find(|(_, s)| s.covers(base, top));

        if let Some((free_id, free_seg)) = containing {
            let _ = self.remove(free_id);
            if base > free_seg.base {
                let _ = self.insert(SegmentKind::Free, Segment::new(free_seg.base, base - free_seg.base)?)?;
            }
            if top < free_seg.top() {
                let _ = self.insert(SegmentKind::Free, Segment::new(top, free_seg.top() - top)?)?;
            }
        } else {
            match self.heap {
                Some(mut heap) if base >= heap.end && top <= heap.limit => {
                    if base > heap.end {
                        let _ = self.insert(SegmentKind::Free, Segment::new(heap.end, base - heap.end)?)?;
                    }
                    heap.end = top;
                    self.heap = Some(heap);
                }
                _ => return Err(MemFault::AllocNotFree { base, size }),
            }
        }

        let id = self.insert(SegmentKind::Allocated, seg)?;
        debug!(%id, base = format_args!("{base:#x}"), size, "fixed allocation");
        Ok(base)
    }

    /// Frees `size` bytes from the front of the allocated segment starting at `base`.
    ///
    /// Freeing the whole segment removes it; freeing less shrinks it from the
    /// front. The freed range joins the free list, merging into a free region
    /// that ends exactly at `base`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::InvalidDealloc` if no allocated segment starts at
    /// `base` and `MemFault::DeallocBeyondSegment` if `size` exceeds it.
    ///
    /// # Returns
    ///
    /// The freed range.
    pub fn deallocate(&mut self, base: u64, size: u64) -> Result<Segment, MemFault> {
        let id = *self
            .allocated
            .get(&base)
            .ok_or(MemFault::InvalidDealloc { base, size })?;
        let seg = self.get(id).ok_or(MemFault::InvalidDealloc { base, size })?;
        if size == 0 {
            return Err(MemFault::InvalidDealloc { base, size });
        }
        if size > seg.size {
            return Err(MemFault::DeallocBeyondSegment {
                base,
                size,
                segment_size: seg.size,
            });
        }

        if size == seg.size {
            let _ = self.remove(id);
        } else {
            self.resize(id, Segment::new(base + size, seg.size - size)?);
        }

        let freed = Segment::new(base, size)?;
        let preceding = self
            .free
            .range(..base)
            .next_back()
            .and_then(|(_, fid)| self.get(*fid).map(|s| (*fid, s)))
            .filter(|(_, s)| s.top() == base);
        match preceding {
            Some((fid, prev)) => self.resize(fid, Segment::new(prev.base, prev.size + size)?),
            None => {
                let _ = self.insert(SegmentKind::Free, freed)?;
            }
        }
        debug!(base = format_args!("{base:#x}"), size, "heap free");
        Ok(freed)
    }

    /// Current heap bounds, once initialised.
    pub const fn heap(&self) -> Option<HeapBounds> {
        self.heap
    }

    /// Exclusive top of the highest allocated segment, or zero when there is none.
    pub fn static_data_end(&self) -> u64 {
        self.allocated
            .values()
            .filter_map(|id| self.get(*id))
            .map(|s| s.top())
            .max()
            .unwrap_or(0)
    }

    // ══════════════════════════════════════════════════════════
    // Thread memory
    // ══════════════════════════════════════════════════════════

    /// Records the TLS template; every later thread segment holds the stack plus
    /// a TLS area of `size` bytes.
    pub const fn set_tls_info(&mut self, base: u64, size: u64) {
        self.tls = TlsInfo { base, size };
    }

    /// The recorded TLS template.
    pub const fn tls_info(&self) -> TlsInfo {
        self.tls
    }

    /// Size of one thread segment: stack plus TLS.
    pub const fn thread_mem_size(&self) -> u64 {
        self.stack_size + self.tls.size
    }

    /// Places a new thread segment directly below the previous one.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::ThreadMemExhausted` if the slot would wrap below zero,
    /// reach into the heap or overlap an allocated segment.
    pub fn add_thread_mem(&mut self) -> Result<SegmentId, MemFault> {
        let size = self.thread_mem_size();
        let floor = self.heap.map_or(0, |h| h.limit);
        let exhausted = |base: u64| MemFault::ThreadMemExhausted {
            base,
            size,
            heap_limit: floor,
        };
        let base = self.next_thread_top.checked_sub(size).ok_or_else(|| exhausted(0))?;
        let seg = Segment::new(base, size)?;
        if base < floor || self.first_overlap(&self.allocated, base, seg.top()).is_some() {
            return Err(exhausted(base));
        }
        let id = self.insert(SegmentKind::Thread, seg)?;
        self.next_thread_top = base.saturating_sub(self.page_size);
        debug!(%id, base = format_args!("{base:#x}"), size, "thread segment added");
        Ok(id)
    }

    /// Removes a thread segment.
    ///
    /// # Returns
    ///
    /// The removed range, or `None` if `id` is not a thread segment.
    pub fn release_thread_mem(&mut self, id: SegmentId) -> Option<Segment> {
        match self.arena.get(&id) {
            Some((SegmentKind::Thread, _)) => self.remove(id),
            _ => None,
        }
    }

    // ══════════════════════════════════════════════════════════
    // Queries
    // ══════════════════════════════════════════════════════════

    /// Returns `true` if `addr` lies in an allocated or thread segment.
    pub fn contains(&self, addr: u64) -> bool {
        self.covering(&self.allocated, addr).is_some() || self.covering(&self.threads, addr).is_some()
    }

    /// The allocated segment containing `addr`.
    pub fn find_allocated(&self, addr: u64) -> Option<(SegmentId, Segment)> {
        self.covering(&self.allocated, addr)
    }

    /// Kind and range of a segment.
    pub fn segment(&self, id: SegmentId) -> Option<(SegmentKind, Segment)> {
        self.arena.get(&id).copied()
    }

    /// Allocated segments in ascending base order.
    pub fn allocated(&self) -> Vec<Segment> {
        self.collect(&self.allocated)
    }

    /// Free segments in ascending base order.
    pub fn free(&self) -> Vec<Segment> {
        self.collect(&self.free)
    }

    /// Thread segments in ascending base order.
    pub fn threads(&self) -> Vec<Segment> {
        self.collect(&self.threads)
    }

    /// Renders every segment as `kind base top size`, one per line.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (kind, index) in [
            (SegmentKind::Allocated, &self.allocated),
            (SegmentKind::Free, &self.free),
            (SegmentKind::Thread, &self.threads),
        ] {
            for seg in self.collect(index) {
                let _ = writeln!(
                    out,
                    "  {kind:<9} base={:#018x} top={:#018x} size={}",
                    seg.base,
                    seg.top(),
                    seg.size
                );
            }
        }
        if let Some(heap) = self.heap {
            let _ = writeln!(
                out,
                "  heap      start={:#018x} end={:#018x} limit={:#018x}",
                heap.start, heap.end, heap.limit
            );
        }
        out
    }

    // ══════════════════════════════════════════════════════════
    // Arena plumbing
    // ══════════════════════════════════════════════════════════

    const fn index(&self, kind: SegmentKind) -> &BTreeMap<u64, SegmentId> {
        match kind {
            SegmentKind::Allocated => &self.allocated,
            SegmentKind::Free => &self.free,
            SegmentKind::Thread => &self.threads,
        }
    }

    fn index_mut(&mut self, kind: SegmentKind) -> &mut BTreeMap<u64, SegmentId> {
        match kind {
            SegmentKind::Allocated => &mut self.allocated,
            SegmentKind::Free => &mut self.free,
            SegmentKind::Thread => &mut self.threads,
        }
    }

    fn insert(&mut self, kind: SegmentKind, seg: Segment) -> Result<SegmentId, MemFault> {
        if let Some(existing) = self.index(kind).get(&seg.base).and_then(|id| self.get(*id)) {
            return Err(duplicate(seg, existing));
        }
        let id = SegmentId(self.next_id);
        self.next_id += 1;
        let _ = self.arena.insert(id, (kind, seg));
        let _ = self.index_mut(kind).insert(seg.base, id);
        Ok(id)
    }

    fn remove(&mut self, id: SegmentId) -> Option<Segment> {
        let (kind, seg) = self.arena.remove(&id)?;
        let _ = self.index_mut(kind).remove(&seg.base);
        Some(seg)
    }

    fn resize(&mut self, id: SegmentId, seg: Segment) {
        if let Some((kind, old)) = self.arena.get(&id).copied() {
            let index = self.index_mut(kind);
            let _ = index.remove(&old.base);
            let _ = index.insert(seg.base, id);
            let _ = self.arena.insert(id, (kind, seg));
        }
    }

    fn get(&self, id: SegmentId) -> Option<Segment> {
        self.arena.get(&id).map(|(_, s)| *s)
    }

    fn collect(&self, index: &BTreeMap<u64, SegmentId>) -> Vec<Segment> {
        index.values().filter_map(|id| self.get(*id)).collect()
    }

    fn covering(&self, index: &BTreeMap<u64, SegmentId>, addr: u64) -> Option<(SegmentId, Segment)> {
        let (_, id) = index.range(..=addr).next_back()?;
        self.get(*id).filter(|s| s.contains(addr)).map(|s| (*id, s))
    }

    fn first_overlap(
        &self,
        index: &BTreeMap<u64, SegmentId>,
        base: u64,
        top: u64,
    ) -> Option<(SegmentId, Segment)> {
        index
            .values()
            .filter_map(|id| self.get(*id).map(|s| (*id, s)))
            .find(|(_, s)| s.overlaps(base, top))
    }

    /// First free, thread-owned or untouched heap range meeting `[base, top)`.
    fn reserved_overlap(&self, base: u64, top: u64) -> Option<Segment> {
        let tail = self
            .heap
            .filter(|h| h.end < h.limit)
            .map(|h| Segment {
                base: h.end,
                size: h.limit - h.end,
            })
            .filter(|t| t.overlaps(base, top));
        self.first_overlap(&self.free, base, top)
            .or_else(|| self.first_overlap(&self.threads, base, top))
            .map(|(_, s)| s)
            .or(tail)
    }

    fn lowest_thread_base(&self) -> Option<u64> {
        self.threads.keys().next().copied()
    }
}

const fn duplicate(seg: Segment, existing: Segment) -> MemFault {
    MemFault::DuplicateSegment {
        base: seg.base,
        top: seg.top(),
        seg_base: existing.base,
        seg_top: existing.top(),
    }
}
