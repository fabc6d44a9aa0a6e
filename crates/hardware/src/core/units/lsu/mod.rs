//! Load/Store Unit (LSU).
//!
//! This module provides the atomic and exclusive-access primitives shared by
//! every hart of a node:
//! - [`atomic`]: Read-modify-write ALU for atomic memory operations.
//! - [`reservation`]: The load-reserve / store-conditional reservation table.
//! - [`future`]: The exclusive-future address set.

/// Atomic memory operation ALU.
pub mod atomic;

/// Exclusive-future address set.
pub mod future;

/// Load-reserve / store-conditional reservation table.
pub mod reservation;

pub use self::atomic::{AmoWidth, AtomicOp, apply_atomic, atomic_alu};
pub use self::future::FutureSet;
pub use self::reservation::{AccessFlags, Reservation, ReservationTable, ScCheck};
