//! Simulation driver.
//!
//! Owns the top-level `Simulator`, the scripted executor used to drive the
//! scheduler and memory subsystem end to end, and the workload description
//! that lays out a program's memory and names its threads' programs.

/// Scripted per-core executor and its program format.
pub mod script;

/// Top-level simulator and run loop.
pub mod simulator;

/// Workload files: static layout, TLS template and programs.
pub mod workload;

pub use self::script::{Op, ProgramSet, ScriptedExecutor};
pub use self::simulator::{RunOutcome, Simulator};
pub use self::workload::Workload;
