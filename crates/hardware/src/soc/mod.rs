//! System-on-Chip (SoC) Components.
//!
//! This module organizes the memory side of a simulated node: the memory
//! subsystem with its selectable backend, and the builder that assembles it
//! from configuration.

/// Memory subsystem construction from configuration.
pub mod builder;

/// Memory subsystem: segments, translation, exclusive access and backends.
pub mod memory;

pub use builder::build_memory;
pub use memory::Memory;
