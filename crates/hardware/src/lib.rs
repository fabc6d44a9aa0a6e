//! Multi-core hart scheduler and memory subsystem simulator library.
//!
//! This crate implements the memory side and the thread scheduler of a
//! cycle-level, multi-core instruction-set simulator:
//! 1. **Memory:** Segment registry and heap, demand-paged translation behind an LRU TLB,
//!    and a Local, Controller or Remote backend chosen once at construction.
//! 2. **Exclusive access:** Load-reserve/store-conditional reservations, atomic memory
//!    operations and exclusive futures.
//! 3. **Scheduling:** A thread table and a per-tick scheduler binding software threads
//!    to harts, with join, yield and migration.
//! 4. **Simulation:** Configuration, a scripted executor, fault injection and statistics.

/// Common types and constants (addresses, request flags, registers, errors).
pub mod common;
/// Simulator configuration (defaults, enums, section structures).
pub mod config;
/// Thread table, scheduler, fault injector and memory-facing units.
pub mod core;
/// Simulator, scripted executor and workload loading.
pub mod sim;
/// Memory subsystem and its construction from configuration.
pub mod soc;
/// Simulation statistics collection and reporting.
pub mod stats;

/// Root configuration type; use `Config::default()` or `Config::from_file`.
pub use crate::config::Config;
/// Per-tick scheduler over the thread table.
pub use crate::core::Scheduler;
/// Top-level simulator of one node.
pub use crate::sim::Simulator;
/// Memory subsystem of one node; build with `soc::build_memory`.
pub use crate::soc::Memory;
