//! Atomic memory operation ALU.
//!
//! Implements the read-modify-write arithmetic for atomic memory operations
//! (AMO). Given the current memory value and the operand, computes the new
//! value to be written back.
//!
//! Supports 4-byte and 8-byte widths. All 4-byte results are sign-extended
//! from bit 31 to 64 bits; only the low four bytes reach memory.

use serde::{Deserialize, Serialize};

use crate::common::MemFault;

/// Atomic read-modify-write operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomicOp {
    /// Atomic swap.
    Swap,
    /// Atomic add.
    Add,
    /// Atomic XOR.
    Xor,
    /// Atomic AND.
    And,
    /// Atomic OR.
    Or,
    /// Atomic minimum (signed).
    Min,
    /// Atomic maximum (signed).
    Max,
    /// Atomic minimum (unsigned).
    Minu,
    /// Atomic maximum (unsigned).
    Maxu,
}

/// Width of an atomic operation in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmoWidth {
    /// 32-bit operation.
    Word,
    /// 64-bit operation.
    Double,
}

impl AmoWidth {
    /// Maps a byte count onto a width.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::AtomicWidth` unless `bytes` is 4 or 8.
    pub const fn from_bytes(bytes: usize) -> Result<Self, MemFault> {
        match bytes {
            4 => Ok(Self::Word),
            8 => Ok(Self::Double),
            other => Err(MemFault::AtomicWidth(other)),
        }
    }

    /// Width in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Word => 4,
            Self::Double => 8,
        }
    }
}

/// Performs an atomic ALU operation.
///
/// Combines the value read from memory with the operand. This is a pure
/// function; the caller performs the read and the write-back.
///
/// # Arguments
///
/// * `op`      - The atomic operation type
/// * `mem_val` - The current value read from memory
/// * `operand` - The value supplied by the requester
/// * `width`   - The width of the operation (Word or Double)
///
/// # Returns
///
/// The computed result that will be written back to memory.
/// For 32-bit operations, the result is sign-extended to 64 bits.
pub fn atomic_alu(op: AtomicOp, mem_val: u64, operand: u64, width: AmoWidth) -> u64 {
    match width {
        AmoWidth::Word => {
            let a = mem_val as i32;
            let b = operand as i32;
            let res = match op {
                AtomicOp::Swap => b,
                AtomicOp::Add => a.wrapping_add(b),
                AtomicOp::Xor => a ^ b,
                AtomicOp::And => a & b,
                AtomicOp::Or => a | b,
                AtomicOp::Min => a.min(b),
                AtomicOp::Max => a.max(b),
                AtomicOp::Minu => (mem_val as u32).min(operand as u32) as i32,
                AtomicOp::Maxu => (mem_val as u32).max(operand as u32) as i32,
            };
            res as i64 as u64
        }
        AmoWidth::Double => {
            let a = mem_val as i64;
            let b = operand as i64;
            let res = match op {
                AtomicOp::Swap => b,
                AtomicOp::Add => a.wrapping_add(b),
                AtomicOp::Xor => a ^ b,
                AtomicOp::And => a & b,
                AtomicOp::Or => a | b,
                AtomicOp::Min => a.min(b),
                AtomicOp::Max => a.max(b),
                AtomicOp::Minu => mem_val.min(operand) as i64,
                AtomicOp::Maxu => mem_val.max(operand) as i64,
            };
            res as u64
        }
    }
}

/// Applies `op` to the little-endian bytes of `target` in place.
///
/// Reads the current value, combines it with `operand` and writes the result
/// back over the same bytes.
///
/// # Errors
///
/// Returns `MemFault::AtomicWidth` unless `target` is 4 or 8 bytes long.
///
/// # Returns
///
/// The value held before the operation, zero-extended.
pub fn apply_atomic(op: AtomicOp, target: &mut [u8], operand: u64) -> Result<u64, MemFault> {
    let width = AmoWidth::from_bytes(target.len())?;
    let mut raw = [0u8; 8];
    raw[..target.len()].copy_from_slice(target);
    let old = u64::from_le_bytes(raw);
    let new = atomic_alu(op, old, operand, width).to_le_bytes();
    target.copy_from_slice(&new[..width.bytes()]);
    Ok(old)
}
