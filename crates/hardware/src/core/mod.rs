//! Core execution side of a node.
//!
//! This module contains the thread table and the per-tick scheduler that binds
//! software threads to harts, the fault injector, and the memory-facing units
//! (translator and exclusive-access primitives) the memory subsystem is built from.

/// Fault injector for decode, memory, register and ALU faults.
pub mod fault;

/// Per-tick scheduler and the executor interface it drives.
pub mod scheduler;

/// Thread table and lifecycle states.
pub mod thread;

/// Memory-facing units (LSU primitives, MMU).
pub mod units;

pub use self::scheduler::{CoreContext, Executor, Scheduler, ThreadChange};
pub use self::thread::{Thread, ThreadId, ThreadState, ThreadTable};
