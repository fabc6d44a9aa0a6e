//! Exclusive-future address set.
//!
//! Addresses carrying a pending exclusive marker, kept sorted and free of
//! duplicates. Any write to a member address removes it.

use std::collections::BTreeSet;

/// Sorted, de-duplicated set of addresses with a pending exclusive marker.
#[derive(Debug, Default)]
pub struct FutureSet {
    addrs: BTreeSet<u64>,
}

impl FutureSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `addr`. Marking a member again is a no-op.
    pub fn set(&mut self, addr: u64) -> bool {
        let _ = self.addrs.insert(addr);
        true
    }

    /// Clears the marker on `addr`.
    ///
    /// # Returns
    ///
    /// `true` if `addr` was a member.
    pub fn revoke(&mut self, addr: u64) -> bool {
        self.addrs.remove(&addr)
    }

    /// Returns `true` if `addr` is marked.
    pub fn status(&self, addr: u64) -> bool {
        self.addrs.contains(&addr)
    }

    /// Clears every marker in `[addr, addr + len)`.
    ///
    /// # Returns
    ///
    /// The number of markers cleared.
    pub fn revoke_range(&mut self, addr: u64, len: usize) -> usize {
        let end = addr.saturating_add(len as u64);
        let hits: Vec<u64> = self.addrs.range(addr..end).copied().collect();
        for a in &hits {
            let _ = self.addrs.remove(a);
        }
        hits.len()
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.addrs.iter().copied()
    }

    /// Number of marked addresses.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Returns `true` if nothing is marked.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}
