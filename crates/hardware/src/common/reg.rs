//! Thread Register Snapshot.
//!
//! This module provides the `RegisterFile` struct, the architectural state a software
//! thread carries between harts. It provides:
//! 1. **Storage:** 32 integer registers with `x0` hardwired to zero, plus the program counter.
//! 2. **ABI Names:** Indices of the registers the loader and scheduler initialise.
//! 3. **Migration:** Serde support so the snapshot can travel in a migration payload.

use serde::{Deserialize, Serialize};

use super::constants::NUM_REGS;

/// Register x1 (return address, ra).
pub const REG_RA: usize = 1;
/// Register x2 (stack pointer, sp).
pub const REG_SP: usize = 2;
/// Register x3 (global pointer, gp).
pub const REG_GP: usize = 3;
/// Register x4 (thread pointer, tp).
pub const REG_TP: usize = 4;
/// Register x8 (frame pointer, s0/fp).
pub const REG_FP: usize = 8;
/// Register x10 (first argument/return value, a0).
pub const REG_A0: usize = 10;
/// Register x11 (second argument, a1).
pub const REG_A1: usize = 11;

/// Register snapshot of one software thread.
///
/// Indices are masked to five bits, the width of a register field, so any
/// index maps onto one of the 32 registers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    regs: [u64; NUM_REGS],
    /// Program counter.
    pub pc: u64,
}

impl RegisterFile {
    /// Creates a register file with every register and the pc cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a general-purpose register. Register `x0` always returns 0.
    #[inline(always)]
    pub const fn read(&self, idx: usize) -> u64 {
        let idx = idx & (NUM_REGS - 1);
        if idx == 0 { 0 } else { self.regs[idx] }
    }

    /// Writes a general-purpose register. Writes to `x0` are ignored.
    #[inline(always)]
    pub const fn write(&mut self, idx: usize, val: u64) {
        let idx = idx & (NUM_REGS - 1);
        if idx != 0 {
            self.regs[idx] = val;
        }
    }

    /// Returns `x1..x31` in order, the integer state carried by a migration payload.
    pub fn gprs(&self) -> &[u64] {
        &self.regs[1..]
    }

    /// Renders the register file as two registers per line.
    pub fn dump(&self) -> String {
        let mut out = format!("pc ={:#018x}\n", self.pc);
        for i in (0..NUM_REGS).step_by(2) {
            out.push_str(&format!(
                "x{:<2}={:#018x} x{:<2}={:#018x}\n",
                i,
                self.read(i),
                i + 1,
                self.read(i + 1)
            ));
        }
        out
    }
}
