//! Fault Injector.
//!
//! Picks a fault kind from the configured set and applies it:
//! 1. **Memory:** ORs a random `width`-bit value into eight bytes of backing memory
//!    at a random offset.
//! 2. **Decode/register/ALU:** Hands the fault to a randomly chosen core's executor.
//!
//! Randomness comes from an xorshift generator so a seed reproduces a run.

use tracing::{info, warn};

use crate::common::MemFault;
use crate::config::{FaultConfig, FaultKind};
use crate::soc::memory::Memory;

use super::scheduler::Executor;

/// Where an injected fault landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultSite {
    /// Eight bytes of backing memory at this physical offset.
    Memory {
        /// Physical byte offset.
        offset: u64,
        /// Bits ORed in.
        mask: u64,
    },
    /// A core's executor accepted the fault.
    Core {
        /// Core index.
        core: usize,
        /// Kind delivered.
        kind: FaultKind,
        /// Bits the executor flips.
        mask: u64,
    },
    /// Nothing took the fault.
    Dropped,
}

/// Seeded fault generator.
#[derive(Clone, Debug)]
pub struct FaultInjector {
    state: u64,
    kinds: Vec<FaultKind>,
    width: u32,
    interval: Option<u64>,
}

impl FaultInjector {
    /// Creates an injector, or `None` when faults are disabled or no kind is configured.
    pub fn from_config(config: &FaultConfig) -> Option<Self> {
        let kinds = config.concrete_kinds();
        if !config.enabled || kinds.is_empty() {
            return None;
        }
        Some(Self {
            state: config.seed.max(1),
            kinds,
            width: config.width.clamp(1, 64),
            interval: config.interval,
        })
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// A random non-zero value of `width` bits.
    fn mask(&mut self) -> u64 {
        let bits = if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        };
        (self.next() & bits).max(1)
    }

    /// Returns `true` if a periodic fault is due at `cycle`.
    pub const fn due(&self, cycle: u64) -> bool {
        match self.interval {
            Some(interval) if interval > 0 => cycle > 0 && cycle % interval == 0,
            _ => false,
        }
    }

    /// Injects one fault.
    ///
    /// # Errors
    ///
    /// Propagates a backend fault from the memory write.
    pub fn inject(
        &mut self,
        memory: &mut Memory,
        executors: &mut [Box<dyn Executor>],
    ) -> Result<FaultSite, MemFault> {
        let pick = (self.next() % self.kinds.len() as u64) as usize;
        let kind = self.kinds[pick];
        let mask = self.mask();
        let site = match kind {
            FaultKind::Mem => {
                let span = memory.mem_size().saturating_sub(8) + 1;
                let offset = self.next() % span;
                if memory.inject_fault(offset, mask)? {
                    FaultSite::Memory { offset, mask }
                } else {
                    FaultSite::Dropped
                }
            }
            FaultKind::Decode | FaultKind::Reg | FaultKind::Alu | FaultKind::All => {
                if executors.is_empty() {
                    FaultSite::Dropped
                } else {
                    let core = (self.next() % executors.len() as u64) as usize;
                    if executors[core].inject_fault(kind, mask) {
                        FaultSite::Core { core, kind, mask }
                    } else {
                        FaultSite::Dropped
                    }
                }
            }
        };
        match site {
            FaultSite::Dropped => warn!(?kind, "injected fault was not taken"),
            _ => info!(?site, "fault injected"),
        }
        Ok(site)
    }
}
