//! Global System Constants.
//!
//! This module defines system-wide constants used across the simulator core. It includes:
//! 1. **Address Space Layout:** The reserved program header area and stack alignment.
//! 2. **Atomic Status Codes:** The values written into a request target on LR/SC outcomes.
//! 3. **Scheduling Limits:** Upper bounds on harts and register snapshot sizes.

/// Bytes reserved at the top of simulated memory for the program header.
///
/// The initial stack top sits immediately below this area.
pub const PROGRAM_HEADER_SIZE: u64 = 1024;

/// Required alignment of a thread's initial stack pointer.
pub const STACK_ALIGN: u64 = 16;

/// Value written into a request target when a load-reserve or store-conditional fails.
pub const RESERVATION_FAIL: u64 = 1;

/// Value written into a request target when a store-conditional succeeds.
pub const RESERVATION_OK: u64 = 0;

/// Maximum number of harts a single core may expose.
pub const MAX_HARTS: usize = 4096;

/// Number of integer registers in a thread register snapshot.
pub const NUM_REGS: usize = 32;

/// Widest access, in bytes, a single memory request may carry into a `u64` target.
pub const MAX_SCALAR_BYTES: usize = 8;
