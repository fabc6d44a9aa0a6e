//! Translation Lookaside Buffer (TLB).
//!
//! A fully associative, strictly least-recently-used cache of recent
//! virtual-to-physical translations. Entries are keyed by the exact virtual
//! address that was translated, so a hit never skips the segment check for an
//! address that was not itself validated. Every entry carries a recency marker
//! drawn from a monotonically increasing clock; the entry with the smallest
//! marker is the eviction victim.

use std::collections::{BTreeMap, HashMap};

use crate::common::PhysAddr;

/// A single entry in the TLB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TlbEntry {
    /// Translated physical address.
    paddr: PhysAddr,
    /// Recency marker; larger is more recent.
    recency: u64,
}

/// Translation Lookaside Buffer structure.
#[derive(Debug)]
pub struct Tlb {
    /// Resident entries keyed by virtual address.
    entries: HashMap<u64, TlbEntry>,
    /// Recency marker to virtual address, oldest first.
    order: BTreeMap<u64, u64>,
    /// Maximum number of resident entries.
    capacity: usize,
    /// Source of recency markers.
    clock: u64,
    hits: u64,
    misses: u64,
}

impl Tlb {
    /// Creates an empty TLB holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            capacity,
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Looks up a virtual address, promoting a hit to most-recently-used.
    ///
    /// Counts the outcome as a hit or a miss.
    ///
    /// # Arguments
    ///
    /// * `vaddr` - The virtual address to look up.
    ///
    /// # Returns
    ///
    /// The cached physical address, or `None` on a miss.
    pub fn lookup(&mut self, vaddr: u64) -> Option<PhysAddr> {
        let stamp = self.tick();
        match self.entries.get_mut(&vaddr) {
            Some(entry) => {
                let _ = self.order.remove(&entry.recency);
                entry.recency = stamp;
                let _ = self.order.insert(stamp, vaddr);
                self.hits += 1;
                Some(entry.paddr)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Returns the cached translation without touching recency or statistics.
    pub fn peek(&self, vaddr: u64) -> Option<PhysAddr> {
        self.entries.get(&vaddr).map(|e| e.paddr)
    }

    /// Inserts a translation as most-recently-used.
    ///
    /// If the TLB is full, the least-recently-used entry is evicted first.
    /// Re-inserting a resident address refreshes it in place.
    ///
    /// # Returns
    ///
    /// The virtual address of the evicted entry, if any.
    pub fn insert(&mut self, vaddr: u64, paddr: PhysAddr) -> Option<u64> {
        let stamp = self.tick();
        if let Some(entry) = self.entries.get_mut(&vaddr) {
            let _ = self.order.remove(&entry.recency);
            *entry = TlbEntry {
                paddr,
                recency: stamp,
            };
            let _ = self.order.insert(stamp, vaddr);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.order.pop_first().map(|(_, victim)| {
                let _ = self.entries.remove(&victim);
                victim
            })
        } else {
            None
        };

        let _ = self.entries.insert(
            vaddr,
            TlbEntry {
                paddr,
                recency: stamp,
            },
        );
        let _ = self.order.insert(stamp, vaddr);
        evicted
    }

    /// Drops the entry for one virtual address, if resident.
    pub fn invalidate(&mut self, vaddr: u64) -> bool {
        match self.entries.remove(&vaddr) {
            Some(entry) => {
                let _ = self.order.remove(&entry.recency);
                true
            }
            None => false,
        }
    }

    /// Drops every entry whose virtual address lies in `[base, top)`.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn invalidate_range(&mut self, base: u64, top: u64) -> usize {
        let victims: Vec<u64> = self
            .entries
            .keys()
            .copied()
            .filter(|v| (base..top).contains(v))
            .collect();
        for vaddr in &victims {
            let _ = self.invalidate(*vaddr);
        }
        victims.len()
    }

    /// Invalidates all entries in the TLB.
    pub fn flush(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Resident virtual addresses from least to most recently used.
    pub fn lru_order(&self) -> Vec<u64> {
        self.order.values().copied().collect()
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entry is resident.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of resident entries.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lookups that hit since construction or the last `take_counters`.
    pub const fn hits(&self) -> u64 {
        self.hits
    }

    /// Lookups that missed since construction or the last `take_counters`.
    pub const fn misses(&self) -> u64 {
        self.misses
    }

    /// Returns `(hits, misses)` and resets both counters.
    pub const fn take_counters(&mut self) -> (u64, u64) {
        let counters = (self.hits, self.misses);
        self.hits = 0;
        self.misses = 0;
        counters
    }

    const fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}
