//! Common utilities and types used throughout the simulator core.
//!
//! This module provides fundamental building blocks shared by the memory subsystem
//! and the scheduler. It includes:
//! 1. **Address Types:** Strong types for virtual and physical addresses.
//! 2. **Constants:** Default sizes for pages, stacks and the translation cache.
//! 3. **Request Types:** Data flags and request kinds carried by memory requests.
//! 4. **Error Handling:** The fatal error taxonomy for memory, scheduling and configuration.
//! 5. **Register Snapshot:** The per-thread architectural register state.

/// Address type definitions (physical and virtual addresses).
pub mod addr;

/// Common constants used throughout the simulator.
pub mod constants;

/// Memory request flags and kinds.
pub mod data;

/// Error types for memory, scheduling and configuration faults.
pub mod error;

/// Thread register snapshot.
pub mod reg;

pub use addr::{PhysAddr, VirtAddr};
pub use data::{DataFlag, ReqKind};
pub use error::{ConfigError, MemFault, SchedError, SimError};
pub use reg::RegisterFile;
