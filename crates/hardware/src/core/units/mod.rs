//! Memory-side units shared by every hart of a node.
//!
//! This module contains the address translator with its translation cache and
//! page table, and the load/store unit's atomic and exclusive-access primitives.

/// Load/Store Unit: atomic ALU, reservation table and exclusive-future set.
pub mod lsu;

/// Memory Management Unit with TLB and demand-paged page table.
pub mod mmu;
