//! Controller-forwarded backend and its latency models.
//!
//! This module provides:
//! 1. **SimpleController:** Fixed latency per access (no row-buffer modeling).
//! 2. **DramController:** Row-buffer-aware latency (CAS, RAS, precharge) for DRAM-style timing.
//! 3. **ControllerBackend:** A memory backend that queues every request and
//!    retires it, in issue order, once its latency has elapsed.

use std::collections::VecDeque;
use std::fmt;

use tracing::debug;

use crate::common::{DataFlag, MemFault, PhysAddr};
use crate::config::{ControllerConfig, ControllerKind};
use crate::core::units::lsu::atomic::{AtomicOp, apply_atomic};

use super::backend::MemoryBackend;
use super::buffer::DramBuffer;
use super::request::{MemReq, TargetSlice};

/// Trait for memory controller implementations that report access latency in cycles.
pub trait MemoryController: fmt::Debug {
    /// Returns the number of cycles required for an access to the given address.
    ///
    /// # Arguments
    ///
    /// * `addr` - Physical address being accessed (may be used for row-buffer modeling).
    ///
    /// # Returns
    ///
    /// Latency in simulation cycles.
    fn access_latency(&mut self, addr: u64) -> u64;
}

/// Fixed-latency memory controller; every access takes the same number of cycles.
#[derive(Debug)]
pub struct SimpleController {
    latency: u64,
}

impl SimpleController {
    /// Creates a simple controller with the given fixed latency in cycles.
    pub const fn new(latency: u64) -> Self {
        Self { latency }
    }
}

impl MemoryController for SimpleController {
    fn access_latency(&mut self, _addr: u64) -> u64 {
        self.latency
    }
}

/// DRAM-style controller with row buffer; models CAS, RAS, and precharge latencies.
#[derive(Debug)]
pub struct DramController {
    last_row: Option<u64>,
    t_cas: u64,
    t_ras: u64,
    t_pre: u64,
    row_mask: u64,
}

impl DramController {
    /// Creates a DRAM controller with the given timing parameters (in cycles).
    ///
    /// # Arguments
    ///
    /// * `t_cas` - Column access strobe latency.
    /// * `t_ras` - Row access strobe latency.
    /// * `t_pre` - Precharge latency.
    pub const fn new(t_cas: u64, t_ras: u64, t_pre: u64) -> Self {
        Self {
            last_row: None,
            t_cas,
            t_ras,
            t_pre,
            row_mask: !2047,
        }
    }
}

impl MemoryController for DramController {
    fn access_latency(&mut self, addr: u64) -> u64 {
        let row = addr & self.row_mask;
        match self.last_row {
            Some(open_row) if open_row == row => self.t_cas,
            Some(_) => {
                self.last_row = Some(row);
                self.t_pre + self.t_ras + self.t_cas
            }
            None => {
                self.last_row = Some(row);
                self.t_ras + self.t_cas
            }
        }
    }
}

/// Builds the latency model named by the configuration.
pub fn timing_model(config: &ControllerConfig) -> Box<dyn MemoryController> {
    match config.kind {
        ControllerKind::Simple => Box::new(SimpleController::new(config.latency)),
        ControllerKind::Dram => Box::new(DramController::new(config.t_cas, config.t_ras, config.t_pre)),
    }
}

#[derive(Debug)]
enum PendingOp {
    Read { dest: TargetSlice },
    Write { data: Vec<u8> },
    Amo { op: AtomicOp, operand: u64, dest: TargetSlice },
}

#[derive(Debug)]
struct Pending {
    ready_at: u64,
    hart: usize,
    paddr: PhysAddr,
    op: PendingOp,
    req: Option<MemReq>,
}

/// Backend that defers every access through a timed memory controller.
///
/// Requests retire in issue order, each no earlier than its issue cycle plus the
/// controller latency. Writes become visible when they retire; a later read of the
/// same location retires after them and so observes them.
#[derive(Debug)]
pub struct ControllerBackend {
    store: DramBuffer,
    timing: Box<dyn MemoryController>,
    queue: VecDeque<Pending>,
    cycle: u64,
}

impl ControllerBackend {
    /// Creates a controller backend over `mem_size` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::BackingAlloc` if the store cannot be allocated.
    pub fn new(mem_size: u64, timing: Box<dyn MemoryController>) -> Result<Self, MemFault> {
        let size = usize::try_from(mem_size).map_err(|_| MemFault::BackingAlloc { size: mem_size })?;
        Ok(Self {
            store: DramBuffer::new(size)?,
            timing,
            queue: VecDeque::new(),
            cycle: 0,
        })
    }

    fn enqueue(
        &mut self,
        hart: usize,
        paddr: PhysAddr,
        op: PendingOp,
        req: Option<MemReq>,
    ) -> Result<bool, MemFault> {
        let len = match &op {
            PendingOp::Read { dest } | PendingOp::Amo { dest, .. } => dest.len(),
            PendingOp::Write { data } => data.len(),
        };
        // Reject out-of-range requests at issue so retirement never faults half-way.
        let _ = self.store.read_slice(paddr.val(), len)?;
        let latency = self.timing.access_latency(paddr.val());
        let earliest = self.queue.back().map_or(0, |p| p.ready_at);
        let ready_at = (self.cycle + latency).max(earliest);
        self.queue.push_back(Pending {
            ready_at,
            hart,
            paddr,
            op,
            req,
        });
        Ok(true)
    }

    fn retire(&mut self, pending: Pending) -> Result<(), MemFault> {
        let addr = pending.paddr.val();
        match pending.op {
            PendingOp::Read { dest } => {
                dest.fill(self.store.read_slice(addr, dest.len())?);
            }
            PendingOp::Write { data } => self.store.write_slice(addr, &data)?,
            PendingOp::Amo { op, operand, dest } => {
                let cell = self.store.slice_mut(addr, dest.len())?;
                let old = apply_atomic(op, cell, operand)?;
                dest.fill(&old.to_le_bytes());
            }
        }
        debug!(hart = pending.hart, paddr = %pending.paddr, cycle = self.cycle, "controller request retired");
        if let Some(req) = pending.req {
            req.complete();
        }
        Ok(())
    }
}

impl MemoryBackend for ControllerBackend {
    fn name(&self) -> &'static str {
        "controller"
    }

    fn capacity(&self) -> u64 {
        self.store.len() as u64
    }

    fn read(
        &mut self,
        hart: usize,
        paddr: PhysAddr,
        dest: TargetSlice,
        req: MemReq,
        _flags: DataFlag,
    ) -> Result<bool, MemFault> {
        self.enqueue(hart, paddr, PendingOp::Read { dest }, Some(req))
    }

    fn write(
        &mut self,
        hart: usize,
        paddr: PhysAddr,
        data: &[u8],
        _flags: DataFlag,
    ) -> Result<bool, MemFault> {
        self.enqueue(
            hart,
            paddr,
            PendingOp::Write {
                data: data.to_vec(),
            },
            None,
        )
    }

    fn amo(
        &mut self,
        hart: usize,
        paddr: PhysAddr,
        op: AtomicOp,
        operand: u64,
        dest: TargetSlice,
        req: MemReq,
    ) -> Result<bool, MemFault> {
        let _ = crate::core::units::lsu::atomic::AmoWidth::from_bytes(dest.len())?;
        self.enqueue(hart, paddr, PendingOp::Amo { op, operand, dest }, Some(req))
    }

    /// A fence is accepted once every earlier request has retired.
    fn fence(&mut self, _hart: usize) -> bool {
        self.queue.is_empty()
    }

    fn tick(&mut self, cycle: u64) -> Result<(), MemFault> {
        self.cycle = cycle;
        while self.queue.front().is_some_and(|p| p.ready_at <= cycle) {
            if let Some(pending) = self.queue.pop_front() {
                self.retire(pending)?;
            }
        }
        Ok(())
    }

    fn outstanding(&self) -> usize {
        self.queue.len()
    }

    fn inject_fault(&mut self, offset: u64, mask: u64) -> Result<bool, MemFault> {
        let cell = self.store.slice_mut(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(cell);
        cell.copy_from_slice(&(u64::from_le_bytes(raw) | mask).to_le_bytes());
        Ok(true)
    }

    fn peek(&self, paddr: PhysAddr, len: usize) -> Option<Vec<u8>> {
        self.store.read_slice(paddr.val(), len).ok().map(<[u8]>::to_vec)
    }
}
