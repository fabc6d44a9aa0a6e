//! Load-reserve / store-conditional reservation table.
//!
//! A load-reserve registers `{hart, address, flags, target}`; a matching
//! store-conditional consumes it. At most one reservation may exist per address
//! across all harts, so a second load-reserve on a held address fails
//! immediately. Ordinary writes that overlap a reserved range revoke it.

use tracing::debug;

use crate::common::constants::RESERVATION_FAIL;
use crate::soc::memory::request::Target;

/// Acquire/release ordering bits of an LR or SC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessFlags {
    /// Acquire ordering.
    pub acquire: bool,
    /// Release ordering.
    pub release: bool,
}

impl AccessFlags {
    /// Packs the flags as `aq | rl << 1`.
    pub const fn bits(self) -> u8 {
        (self.acquire as u8) | ((self.release as u8) << 1)
    }
}

/// A held reservation.
#[derive(Debug)]
pub struct Reservation {
    /// Hart holding the reservation.
    pub hart: usize,
    /// Reserved virtual address.
    pub addr: u64,
    /// Reserved length in bytes.
    pub len: usize,
    /// Ordering flags of the load-reserve.
    pub flags: AccessFlags,
    /// Destination of the load-reserve; holds the reserved value once loaded.
    pub target: Target,
}

impl Reservation {
    const fn overlaps(&self, addr: u64, len: usize) -> bool {
        let (a0, a1) = (self.addr, self.addr.saturating_add(self.len as u64));
        let (b0, b1) = (addr, addr.saturating_add(len as u64));
        a0 < b1 && b0 < a1
    }
}

/// Result of checking a store-conditional against the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScCheck {
    /// A reservation exists and its held value passes the match test.
    Match,
    /// A reservation exists but the held value fails the match test.
    Mismatch,
    /// The hart holds no reservation on the address.
    NoReservation,
}

/// All live reservations of one node.
#[derive(Debug, Default)]
pub struct ReservationTable {
    entries: Vec<Reservation>,
}

impl ReservationTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reservation for `hart` on `addr`.
    ///
    /// Fails if any hart, including `hart` itself, already holds a reservation
    /// on `addr`. On failure the conflict marker is written into `target` and
    /// the table is unchanged.
    ///
    /// # Returns
    ///
    /// `true` if the reservation was registered.
    pub fn reserve(
        &mut self,
        hart: usize,
        addr: u64,
        len: usize,
        flags: AccessFlags,
        target: &Target,
    ) -> bool {
        if let Some(held) = self.entries.iter().find(|r| r.addr == addr) {
            debug!(
                hart,
                holder = held.hart,
                addr = format_args!("{addr:#x}"),
                "load-reserve conflict"
            );
            target.set_value(RESERVATION_FAIL);
            return false;
        }
        self.entries.push(Reservation {
            hart,
            addr,
            len,
            flags,
            target: target.clone(),
        });
        debug!(hart, addr = format_args!("{addr:#x}"), flags = flags.bits(), "reservation taken");
        true
    }

    /// Checks a store-conditional of `data` by `hart` on `addr`.
    ///
    /// The held value is the reservation target's contents; the store matches
    /// when `held & data` is non-zero.
    pub fn check(&self, hart: usize, addr: u64, data: u64) -> ScCheck {
        match self.find(hart, addr) {
            Some(idx) => {
                let held = self.entries[idx].target.value();
                if held & data != 0 {
                    ScCheck::Match
                } else {
                    ScCheck::Mismatch
                }
            }
            None => ScCheck::NoReservation,
        }
    }

    /// Removes and returns the reservation `hart` holds on `addr`.
    pub fn consume(&mut self, hart: usize, addr: u64) -> Option<Reservation> {
        self.find(hart, addr).map(|idx| self.entries.remove(idx))
    }

    /// Revokes every reservation overlapping `[addr, addr + len)`.
    ///
    /// # Returns
    ///
    /// The number of reservations revoked.
    pub fn invalidate(&mut self, addr: u64, len: usize) -> usize {
        let before = self.entries.len();
        self.entries.retain(|r| !r.overlaps(addr, len));
        let revoked = before - self.entries.len();
        if revoked > 0 {
            debug!(addr = format_args!("{addr:#x}"), revoked, "reservations revoked by write");
        }
        revoked
    }

    /// Hart holding a reservation on `addr`, if any.
    pub fn holder(&self, addr: u64) -> Option<usize> {
        self.entries.iter().find(|r| r.addr == addr).map(|r| r.hart)
    }

    /// Number of live reservations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no reservation is held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, hart: usize, addr: u64) -> Option<usize> {
        self.entries.iter().position(|r| r.hart == hart && r.addr == addr)
    }
}
