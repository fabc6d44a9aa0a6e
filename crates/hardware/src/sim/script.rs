//! Scripted Executor.
//!
//! A trace-driven executor that runs per-thread programs of memory and thread
//! ops, one op per hart per cycle. It drives the memory subsystem and the
//! scheduler end to end without an instruction set:
//! 1. **Programs:** Each program is a list of `Op`s; a thread's pc encodes the
//!    program index in its upper half and the op index in its lower half.
//! 2. **Stalls:** Loads, atomics and load-reserves stall the hart until their
//!    completion callback fires, then write the destination register.
//! 3. **Faults:** Decode faults drop the next op, register faults flip bits of a
//!    running thread's register, ALU faults flip bits of the next result.

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde::Deserialize;
use tracing::debug;

use crate::common::constants::MAX_SCALAR_BYTES;
use crate::common::{ConfigError, DataFlag, ReqKind, SimError};
use crate::config::FaultKind;
use crate::core::scheduler::{CoreContext, Executor};
use crate::core::thread::ThreadId;
use crate::core::units::lsu::{AccessFlags, AtomicOp};
use crate::soc::memory::remote::Locality;
use crate::soc::memory::request::{MemReq, Target};
use crate::stats::CoreStats;

const PROGRAM_SHIFT: u32 = 32;
const OP_MASK: u64 = (1 << PROGRAM_SHIFT) - 1;

/// Entry pc of program `index`.
pub const fn entry_pc(index: usize) -> u64 {
    (index as u64) << PROGRAM_SHIFT
}

const fn default_width() -> usize {
    MAX_SCALAR_BYTES
}

/// One scripted operation. Register operands are indices `0..32`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// `rd = imm`.
    Li {
        /// Destination register.
        rd: usize,
        /// Immediate.
        imm: u64,
    },
    /// `rd = allocate(size)`.
    Alloc {
        /// Destination register.
        rd: usize,
        /// Bytes to allocate.
        size: u64,
    },
    /// `deallocate(rs, size)`.
    Free {
        /// Register holding the base.
        rs: usize,
        /// Bytes to free.
        size: u64,
    },
    /// `rd = scratchpad_alloc(size)`.
    ScratchAlloc {
        /// Destination register.
        rd: usize,
        /// Bytes to allocate.
        size: u64,
    },
    /// `scratchpad_free(rs, size)`.
    ScratchFree {
        /// Register holding the address.
        rs: usize,
        /// Bytes to free.
        size: u64,
    },
    /// Stores the low `width` bytes of `src` at `base + offset`.
    Store {
        /// Base register.
        base: usize,
        /// Byte offset.
        #[serde(default)]
        offset: i64,
        /// Source register.
        src: usize,
        /// Access width in bytes.
        #[serde(default = "default_width")]
        width: usize,
    },
    /// Loads `width` bytes at `base + offset` into `rd`.
    Load {
        /// Destination register.
        rd: usize,
        /// Base register.
        base: usize,
        /// Byte offset.
        #[serde(default)]
        offset: i64,
        /// Access width in bytes.
        #[serde(default = "default_width")]
        width: usize,
        /// Sign-extend instead of zero-extend.
        #[serde(default)]
        signed: bool,
    },
    /// Atomic `amo` of `src` at `base + offset`; the old value lands in `rd`.
    Amo {
        /// Destination register.
        rd: usize,
        /// Base register.
        base: usize,
        /// Byte offset.
        #[serde(default)]
        offset: i64,
        /// Operand register.
        src: usize,
        /// 4 or 8.
        #[serde(default = "default_width")]
        width: usize,
        /// Operation.
        amo: AtomicOp,
    },
    /// Load-reserve into `rd`.
    LoadReserve {
        /// Destination register.
        rd: usize,
        /// Base register.
        base: usize,
        /// Byte offset.
        #[serde(default)]
        offset: i64,
        /// Access width in bytes.
        #[serde(default = "default_width")]
        width: usize,
    },
    /// Store-conditional of `src`; `rd` receives 0 on success, 1 on failure.
    StoreConditional {
        /// Status register.
        rd: usize,
        /// Base register.
        base: usize,
        /// Byte offset.
        #[serde(default)]
        offset: i64,
        /// Source register.
        src: usize,
        /// Access width in bytes.
        #[serde(default = "default_width")]
        width: usize,
    },
    /// Spawns `program` with register `arg` in its `a0`; `rd` receives the thread id.
    Spawn {
        /// Destination register.
        rd: usize,
        /// Program name.
        program: String,
        /// Argument register.
        #[serde(default)]
        arg: usize,
    },
    /// Waits for the thread whose id is in `rs`.
    Join {
        /// Register holding the thread id.
        rs: usize,
    },
    /// Gives up the hart.
    Yield,
    /// Migrates to the node owning `base + offset` if it is remote.
    Migrate {
        /// Base register.
        base: usize,
        /// Byte offset.
        #[serde(default)]
        offset: i64,
    },
    /// Memory fence; retried until the backend accepts it.
    Fence,
    /// Ends the thread.
    Exit,
}

/// A named list of ops.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    /// Program name.
    pub name: String,
    /// Ops in program order.
    pub ops: Vec<Op>,
}

/// Every program of a workload, addressed by index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramSet {
    programs: Vec<Program>,
}

impl ProgramSet {
    /// Builds the set, checking op operands and spawn targets.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first bad op.
    pub fn new(programs: Vec<Program>) -> Result<Self, ConfigError> {
        let set = Self { programs };
        for program in &set.programs {
            for (i, op) in program.ops.iter().enumerate() {
                set.check(op)
                    .map_err(|why| ConfigError::Invalid(format!("{}[{i}]: {why}", program.name)))?;
            }
        }
        Ok(set)
    }

    fn check(&self, op: &Op) -> Result<(), String> {
        let width_ok = |w: usize| (1..=MAX_SCALAR_BYTES).contains(&w);
        match op {
            Op::Store { width, .. }
            | Op::Load { width, .. }
            | Op::LoadReserve { width, .. }
            | Op::StoreConditional { width, .. }
                if !width_ok(*width) =>
            {
                Err(format!("width {width} is not between 1 and {MAX_SCALAR_BYTES}"))
            }
            Op::Amo { width, .. } if *width != 4 && *width != 8 => {
                Err(format!("atomic width {width} must be 4 or 8"))
            }
            Op::Spawn { program, .. } if self.index(program).is_none() => {
                Err(format!("spawn of unknown program '{program}'"))
            }
            _ => Ok(()),
        }
    }

    /// Index of the program called `name`.
    pub fn index(&self, name: &str) -> Option<usize> {
        self.programs.iter().position(|p| p.name == name)
    }

    /// The op at `pc`, or `None` past the end of its program.
    pub fn op_at(&self, pc: u64) -> Option<&Op> {
        let program = usize::try_from(pc >> PROGRAM_SHIFT).ok()?;
        let idx = usize::try_from(pc & OP_MASK).ok()?;
        self.programs.get(program)?.ops.get(idx)
    }

    /// Number of programs.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Returns `true` if there are no programs.
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[derive(Debug)]
struct PendingLoad {
    rd: usize,
    target: Target,
    flag: DataFlag,
    done: Rc<Cell<bool>>,
}

impl PendingLoad {
    fn issue(kind: ReqKind, hart: usize, rd: usize, width: usize, flag: DataFlag) -> (Self, MemReq) {
        let done = Rc::new(Cell::new(false));
        let signal = Rc::clone(&done);
        let req = MemReq::new(kind, hart, move || signal.set(true));
        let pending = Self {
            rd,
            target: Target::new(width),
            flag,
            done,
        };
        (pending, req)
    }
}

/// Executor running scripted programs on the harts of one core.
#[derive(Debug)]
pub struct ScriptedExecutor {
    programs: Rc<ProgramSet>,
    pending: HashMap<ThreadId, PendingLoad>,
    faults: VecDeque<(FaultKind, u64)>,
    stats: CoreStats,
}

impl ScriptedExecutor {
    /// Creates an executor over `programs`.
    pub fn new(programs: Rc<ProgramSet>) -> Self {
        Self {
            programs,
            pending: HashMap::new(),
            faults: VecDeque::new(),
            stats: CoreStats::default(),
        }
    }

    /// One executor per core, all sharing `programs`.
    pub fn for_cores(num_cores: usize, programs: &Rc<ProgramSet>) -> Vec<Box<dyn Executor>> {
        (0..num_cores)
            .map(|_| Box::new(Self::new(Rc::clone(programs))) as Box<dyn Executor>)
            .collect()
    }

    fn take_fault(&mut self, kind: FaultKind) -> Option<u64> {
        let pos = self.faults.iter().position(|(k, _)| *k == kind)?;
        self.faults.remove(pos).map(|(_, mask)| mask)
    }

    fn set_reg(&mut self, ctx: &mut CoreContext<'_>, hart: usize, rd: usize, value: u64) {
        let value = match self.take_fault(FaultKind::Alu) {
            Some(mask) => value ^ mask,
            None => value,
        };
        if let Some(regs) = ctx.regs_mut(hart) {
            regs.write(rd, value);
        }
    }

    fn reg(ctx: &CoreContext<'_>, hart: usize, idx: usize) -> u64 {
        ctx.regs(hart).map_or(0, |r| r.read(idx))
    }

    fn addr(ctx: &CoreContext<'_>, hart: usize, base: usize, offset: i64) -> u64 {
        Self::reg(ctx, hart, base).wrapping_add_signed(offset)
    }

    fn apply_reg_fault(&mut self, ctx: &mut CoreContext<'_>) {
        let Some(mask) = self.take_fault(FaultKind::Reg) else {
            return;
        };
        let hart = (0..ctx.num_harts()).find(|&h| ctx.hart_thread(h).is_some());
        if let Some(regs) = hart.and_then(|h| ctx.regs_mut(h)) {
            let idx = (mask % 31 + 1) as usize;
            let value = regs.read(idx) ^ mask;
            regs.write(idx, value);
        }
    }

    /// Writes back a finished load; returns `false` while it is still in flight.
    fn retire_pending(&mut self, ctx: &mut CoreContext<'_>, hart: usize, tid: ThreadId) -> bool {
        match self.pending.get(&tid) {
            Some(p) if !p.done.get() => false,
            Some(_) => {
                if let Some(p) = self.pending.remove(&tid) {
                    let value = p.target.extended(p.flag);
                    self.set_reg(ctx, hart, p.rd, value);
                }
                true
            }
            None => true,
        }
    }

    fn await_load(&mut self, ctx: &mut CoreContext<'_>, hart: usize, tid: ThreadId, pending: PendingLoad) {
        let _ = self.pending.insert(tid, pending);
        let _ = self.retire_pending(ctx, hart, tid);
    }

    /// Rewinds `hart` to `pc` so the op is issued again on a later tick.
    fn retry(&mut self, ctx: &mut CoreContext<'_>, hart: usize, pc: u64) {
        if let Some(regs) = ctx.regs_mut(hart) {
            regs.pc = pc;
        }
        self.stats.stalls_mem += 1;
    }

    fn step(&mut self, ctx: &mut CoreContext<'_>, hart: usize, tid: ThreadId) -> Result<(), SimError> {
        let global_hart = ctx.core() * ctx.num_harts() + hart;
        let pc = ctx.regs(hart).map_or(0, |r| r.pc);
        let Some(op) = self.programs.op_at(pc).cloned() else {
            let _ = ctx.exit(hart);
            return Ok(());
        };
        if let Some(regs) = ctx.regs_mut(hart) {
            regs.pc = pc + 1;
        }
        if self.take_fault(FaultKind::Decode).is_some() {
            debug!(tid = %tid, pc = format_args!("{pc:#x}"), "op dropped by decode fault");
            return Ok(());
        }

        match op {
            Op::Li { rd, imm } => self.set_reg(ctx, hart, rd, imm),
            Op::Alloc { rd, size } => {
                let base = ctx.memory().allocate(size)?;
                self.set_reg(ctx, hart, rd, base);
            }
            Op::Free { rs, size } => {
                let base = Self::reg(ctx, hart, rs);
                ctx.memory().deallocate(base, size)?;
            }
            Op::ScratchAlloc { rd, size } => {
                let addr = ctx.memory().scratchpad_alloc(size)?;
                self.set_reg(ctx, hart, rd, addr);
            }
            Op::ScratchFree { rs, size } => {
                let addr = Self::reg(ctx, hart, rs);
                ctx.memory().scratchpad_free(addr, size)?;
            }
            Op::Store {
                base,
                offset,
                src,
                width,
            } => {
                let addr = Self::addr(ctx, hart, base, offset);
                let bytes = Self::reg(ctx, hart, src).to_le_bytes();
                if !ctx.memory().write(global_hart, addr, &bytes[..width], DataFlag::None)? {
                    self.retry(ctx, hart, pc);
                    return Ok(());
                }
            }
            Op::Load {
                rd,
                base,
                offset,
                width,
                signed,
            } => {
                let addr = Self::addr(ctx, hart, base, offset);
                let flag = if signed { DataFlag::SignExtend } else { DataFlag::ZeroExtend };
                let (pending, req) = PendingLoad::issue(ReqKind::Read, global_hart, rd, width, flag);
                if !ctx.memory().read(global_hart, addr, width, &pending.target, req, flag)? {
                    self.retry(ctx, hart, pc);
                    return Ok(());
                }
                self.await_load(ctx, hart, tid, pending);
            }
            Op::Amo {
                rd,
                base,
                offset,
                src,
                width,
                amo,
            } => {
                let addr = Self::addr(ctx, hart, base, offset);
                let operand = Self::reg(ctx, hart, src);
                let extend = if width == 4 { DataFlag::SignExtend } else { DataFlag::None };
                let (pending, req) = PendingLoad::issue(ReqKind::Atomic, global_hart, rd, width, extend);
                if !ctx
                    .memory()
                    .amo(global_hart, addr, operand, DataFlag::from(amo), &pending.target, req)?
                {
                    self.retry(ctx, hart, pc);
                    return Ok(());
                }
                self.await_load(ctx, hart, tid, pending);
            }
            Op::LoadReserve {
                rd,
                base,
                offset,
                width,
            } => {
                let addr = Self::addr(ctx, hart, base, offset);
                let (pending, req) = PendingLoad::issue(ReqKind::Read, global_hart, rd, width, DataFlag::None);
                let reserved = ctx.memory().load_reserve(
                    global_hart,
                    addr,
                    &pending.target,
                    AccessFlags::default(),
                    req,
                    DataFlag::None,
                )?;
                // A conflict completes at once with the marker; a refusal leaves it pending.
                if !reserved && !pending.done.get() {
                    self.retry(ctx, hart, pc);
                    return Ok(());
                }
                self.await_load(ctx, hart, tid, pending);
            }
            Op::StoreConditional {
                rd,
                base,
                offset,
                src,
                width,
            } => {
                let addr = Self::addr(ctx, hart, base, offset);
                let data = Self::reg(ctx, hart, src);
                let status = Target::new(MAX_SCALAR_BYTES);
                let _ = ctx.memory().store_conditional(
                    global_hart,
                    addr,
                    data,
                    width,
                    &status,
                    AccessFlags::default(),
                )?;
                self.set_reg(ctx, hart, rd, status.value());
            }
            Op::Spawn { rd, program, arg } => {
                let index = self.programs.index(&program).unwrap_or_default();
                let arg = Self::reg(ctx, hart, arg);
                let child = ctx.spawn(hart, entry_pc(index), arg)?;
                self.set_reg(ctx, hart, rd, u64::from(child.0));
            }
            Op::Join { rs } => {
                let target = ThreadId(Self::reg(ctx, hart, rs) as u32);
                let _ = ctx.join(hart, target);
            }
            Op::Yield => {
                let _ = ctx.yield_thread(hart);
            }
            Op::Migrate { base, offset } => {
                let addr = Self::addr(ctx, hart, base, offset);
                if let Locality::Remote(node) = ctx.memory().locality(addr) {
                    let _ = ctx.migrate(hart, node);
                }
            }
            Op::Fence => {
                if !ctx.memory().fence(global_hart) {
                    self.retry(ctx, hart, pc);
                    return Ok(());
                }
            }
            Op::Exit => {
                let _ = ctx.exit(hart);
            }
        }
        self.stats.ops_retired += 1;
        Ok(())
    }
}

impl Executor for ScriptedExecutor {
    fn clock_tick(&mut self, _cycle: u64, ctx: &mut CoreContext<'_>) -> Result<bool, SimError> {
        self.stats.cycles += 1;
        self.apply_reg_fault(ctx);
        let mut busy = false;
        for hart in 0..ctx.num_harts() {
            let Some(tid) = ctx.hart_thread(hart) else {
                continue;
            };
            busy = true;
            if !self.retire_pending(ctx, hart, tid) {
                self.stats.stalls_mem += 1;
                continue;
            }
            self.step(ctx, hart, tid)?;
        }
        if busy {
            self.stats.cycles_busy += 1;
        }
        Ok(busy)
    }

    fn take_stats(&mut self) -> CoreStats {
        std::mem::take(&mut self.stats)
    }

    fn inject_fault(&mut self, kind: FaultKind, mask: u64) -> bool {
        match kind {
            FaultKind::Decode | FaultKind::Reg | FaultKind::Alu => {
                self.faults.push_back((kind, mask));
                self.stats.faults_injected += 1;
                true
            }
            FaultKind::Mem | FaultKind::All => false,
        }
    }
}
