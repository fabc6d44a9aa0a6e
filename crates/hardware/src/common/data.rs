//! Memory Request Types.
//!
//! This module defines the classification carried by every memory request:
//! 1. **Request Kind:** Whether the request is a read, a write or an atomic read-modify-write.
//! 2. **Data Flags:** How loaded bytes are extended into a register and, for atomics,
//!    which operation combines memory with the operand.

use serde::{Deserialize, Serialize};

use crate::core::units::lsu::atomic::AtomicOp;

/// Kind of memory request carried by a completion descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReqKind {
    /// Data read; completes when the destination has been filled.
    Read,
    /// Data write.
    Write,
    /// Atomic read-modify-write; completes when the old value is in the destination.
    Atomic,
}

/// Flags attached to a memory request.
///
/// Extension flags govern how narrow loads widen into 64 bits; the atomic flags
/// select the operation performed by an AMO.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataFlag {
    /// No special handling; behaves as zero extension for loads.
    #[default]
    None,
    /// Zero-extend narrow loads.
    ZeroExtend,
    /// Sign-extend narrow loads.
    SignExtend,
    /// Atomic add.
    AtomicAdd,
    /// Atomic exclusive-or.
    AtomicXor,
    /// Atomic and.
    AtomicAnd,
    /// Atomic or.
    AtomicOr,
    /// Atomic swap.
    AtomicSwap,
    /// Atomic signed minimum.
    AtomicMin,
    /// Atomic signed maximum.
    AtomicMax,
    /// Atomic unsigned minimum.
    AtomicUMin,
    /// Atomic unsigned maximum.
    AtomicUMax,
}

impl DataFlag {
    /// Returns the atomic operation selected by this flag, if it is an atomic flag.
    pub const fn atomic_op(self) -> Option<AtomicOp> {
        match self {
            Self::AtomicAdd => Some(AtomicOp::Add),
            Self::AtomicXor => Some(AtomicOp::Xor),
            Self::AtomicAnd => Some(AtomicOp::And),
            Self::AtomicOr => Some(AtomicOp::Or),
            Self::AtomicSwap => Some(AtomicOp::Swap),
            Self::AtomicMin => Some(AtomicOp::Min),
            Self::AtomicMax => Some(AtomicOp::Max),
            Self::AtomicUMin => Some(AtomicOp::Minu),
            Self::AtomicUMax => Some(AtomicOp::Maxu),
            Self::None | Self::ZeroExtend | Self::SignExtend => None,
        }
    }

    /// Widens a little-endian value of `len` bytes to 64 bits according to this flag.
    ///
    /// Only `SignExtend` sign-extends; every other flag zero-extends.
    ///
    /// # Arguments
    ///
    /// * `raw` - The loaded value, right-aligned.
    /// * `len` - Access width in bytes (1..=8).
    pub const fn extend(self, raw: u64, len: usize) -> u64 {
        if len >= 8 || len == 0 {
            return raw;
        }
        let bits = (len * 8) as u32;
        let mask = (1u64 << bits) - 1;
        let value = raw & mask;
        match self {
            Self::SignExtend => {
                let shift = 64 - bits;
                (((value << shift) as i64) >> shift) as u64
            }
            _ => value,
        }
    }
}

impl From<AtomicOp> for DataFlag {
    fn from(op: AtomicOp) -> Self {
        match op {
            AtomicOp::Add => Self::AtomicAdd,
            AtomicOp::Xor => Self::AtomicXor,
            AtomicOp::And => Self::AtomicAnd,
            AtomicOp::Or => Self::AtomicOr,
            AtomicOp::Swap => Self::AtomicSwap,
            AtomicOp::Min => Self::AtomicMin,
            AtomicOp::Max => Self::AtomicMax,
            AtomicOp::Minu => Self::AtomicUMin,
            AtomicOp::Maxu => Self::AtomicUMax,
        }
    }
}
