//! Per-Tick Hart Scheduler.
//!
//! The scheduler binds software threads from the thread table onto a fixed
//! pool of harts spread over several cores. One tick processes every core in
//! index order:
//! 1. **Assign:** If a thread is ready and the core has an idle hart, the head of
//!    the ready queue is placed on it and the core is enabled.
//! 2. **Advance:** An enabled core's executor runs one cycle. A core that reports
//!    no further progress is torn down and its statistics folded in.
//! 3. **Dispatch:** Every thread change the executor reported is applied.
//! 4. **Idle:** A core with no thread left on any hart is disabled.
//!
//! After the cores, blocked threads whose join target completed are woken. The
//! run ends once every core is disabled, nothing is ready or blocked, the
//! backend has no request in flight and at least one thread has completed.

use std::fmt;

use tracing::{debug, info, warn};

use crate::common::reg::{REG_A0, REG_A1, REG_FP, REG_GP};
use crate::common::{RegisterFile, SchedError, SimError};
use crate::config::{FaultConfig, FaultKind, SchedulerConfig};
use crate::soc::memory::{DumpStage, Memory};
use crate::soc::memory::remote::{MigrationPayload, NodeId};
use crate::soc::memory::segments::SegmentId;
use crate::stats::{CoreStats, SimStats};

use super::fault::FaultInjector;
use super::thread::{ThreadId, ThreadState, ThreadTable};

/// A state change an executor reports for the thread on one of its harts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadChange {
    /// The thread finished.
    Exit,
    /// The thread gives up its hart and rejoins the ready queue.
    Yield,
    /// The thread waits for another thread to complete.
    Join(ThreadId),
    /// The thread was shipped to another node.
    Migrate(NodeId),
}

/// The per-core execution engine the scheduler drives.
pub trait Executor: fmt::Debug {
    /// Advances the core by one cycle.
    ///
    /// # Errors
    ///
    /// Any fatal fault raised by the threads on this core.
    ///
    /// # Returns
    ///
    /// `false` once the core has no further progress to make.
    fn clock_tick(&mut self, cycle: u64, ctx: &mut CoreContext<'_>) -> Result<bool, SimError>;

    /// Releases a co-processor attached to the core, if any.
    fn teardown_coprocessor(&mut self) {}

    /// Returns and resets the core's counters.
    fn take_stats(&mut self) -> CoreStats {
        CoreStats::default()
    }

    /// Accepts a decode, register or ALU fault flipping the bits of `mask`.
    ///
    /// # Returns
    ///
    /// `true` if the core took the fault.
    fn inject_fault(&mut self, _kind: FaultKind, _mask: u64) -> bool {
        false
    }
}

/// What an executor may see and do during one cycle of one core.
#[derive(Debug)]
pub struct CoreContext<'a> {
    core: usize,
    harts: &'a [Option<ThreadId>],
    threads: &'a mut ThreadTable,
    memory: &'a mut Memory,
    changes: Vec<(usize, ThreadId, ThreadChange)>,
}

impl<'a> CoreContext<'a> {
    /// Creates a context for `core` whose hart slots are `harts`.
    pub fn new(
        core: usize,
        harts: &'a [Option<ThreadId>],
        threads: &'a mut ThreadTable,
        memory: &'a mut Memory,
    ) -> Self {
        Self {
            core,
            harts,
            threads,
            memory,
            changes: Vec::new(),
        }
    }

    /// Index of the core being ticked.
    pub const fn core(&self) -> usize {
        self.core
    }

    /// Number of harts on the core.
    pub const fn num_harts(&self) -> usize {
        self.harts.len()
    }

    /// Thread on `hart`, if any.
    pub fn hart_thread(&self, hart: usize) -> Option<ThreadId> {
        self.harts.get(hart).copied().flatten()
    }

    /// Register snapshot of the thread on `hart`.
    pub fn regs(&self, hart: usize) -> Option<&RegisterFile> {
        let tid = self.hart_thread(hart)?;
        self.threads.get(tid).map(|t| &t.regs)
    }

    /// Mutable register snapshot of the thread on `hart`.
    pub fn regs_mut(&mut self, hart: usize) -> Option<&mut RegisterFile> {
        let tid = self.hart_thread(hart)?;
        self.threads.get_mut(tid).map(|t| &mut t.regs)
    }

    /// The node's memory subsystem.
    pub const fn memory(&mut self) -> &mut Memory {
        self.memory
    }

    /// Returns `true` if `tid` finished or migrated away.
    pub fn is_completed(&self, tid: ThreadId) -> bool {
        self.threads.is_completed(tid)
    }

    /// Creates a child of the thread on `hart` starting at `start` with `arg` in `a0`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::ThreadMemExhausted` if no thread segment fits.
    pub fn spawn(&mut self, hart: usize, start: u64, arg: u64) -> Result<ThreadId, SimError> {
        let parent = self.hart_thread(hart);
        spawn_in(self.threads, self.memory, parent, start, arg)
    }

    fn record(&mut self, hart: usize, change: ThreadChange) -> bool {
        match self.hart_thread(hart) {
            Some(tid) => {
                self.changes.push((hart, tid, change));
                true
            }
            None => false,
        }
    }

    /// Reports that the thread on `hart` finished.
    pub fn exit(&mut self, hart: usize) -> bool {
        self.record(hart, ThreadChange::Exit)
    }

    /// Reports that the thread on `hart` yields its hart.
    pub fn yield_thread(&mut self, hart: usize) -> bool {
        self.record(hart, ThreadChange::Yield)
    }

    /// Reports that the thread on `hart` joins `target`.
    pub fn join(&mut self, hart: usize, target: ThreadId) -> bool {
        self.record(hart, ThreadChange::Join(target))
    }

    /// Ships the thread on `hart` to `dest` and reports it migrated.
    ///
    /// # Returns
    ///
    /// `false` if there is no thread on `hart` or the backend cannot migrate;
    /// the thread then keeps running here.
    pub fn migrate(&mut self, hart: usize, dest: NodeId) -> bool {
        let Some(tid) = self.hart_thread(hart) else {
            return false;
        };
        let Some(thread) = self.threads.get(tid) else {
            return false;
        };
        let payload = MigrationPayload {
            tid: tid.0,
            pc: thread.regs.pc,
            gprs: thread.regs.gprs().to_vec(),
        };
        if !self.memory.migrate(payload, dest) {
            warn!(tid = %tid, %dest, "migration rejected");
            return false;
        }
        self.record(hart, ThreadChange::Migrate(dest))
    }

    /// Changes reported during this cycle, in report order.
    pub fn into_changes(self) -> Vec<(usize, ThreadId, ThreadChange)> {
        self.changes
    }
}

/// Creates a thread with its own stack/TLS segment and queues it.
fn spawn_in(
    threads: &mut ThreadTable,
    memory: &mut Memory,
    parent: Option<ThreadId>,
    start: u64,
    arg: u64,
) -> Result<ThreadId, SimError> {
    let (seg, top) = thread_segment(memory)?;
    let tls = memory.segments().tls_info().size;
    let tid = threads.create(parent, start, top.saturating_sub(tls), Some(seg));
    if let Some(thread) = threads.get_mut(tid) {
        thread.regs.write(REG_A0, arg);
    }
    Ok(tid)
}

fn thread_segment(memory: &mut Memory) -> Result<(SegmentId, u64), SimError> {
    let seg = memory.add_thread_mem()?;
    let top = memory
        .segments()
        .segment(seg)
        .map_or(memory.stack_top(), |(_, range)| range.top());
    Ok((seg, top))
}

#[derive(Debug)]
struct CoreSlot {
    harts: Vec<Option<ThreadId>>,
    enabled: bool,
}

/// Thread table plus the per-core hart assignments.
#[derive(Debug)]
pub struct Scheduler {
    threads: ThreadTable,
    cores: Vec<CoreSlot>,
    injector: Option<FaultInjector>,
    stats: SimStats,
    finished: bool,
}

impl Scheduler {
    /// Creates a scheduler with `num_cores` cores of `num_harts` harts each.
    pub fn new(config: &SchedulerConfig, faults: &FaultConfig) -> Self {
        let cores = (0..config.num_cores)
            .map(|_| CoreSlot {
                harts: vec![None; config.num_harts],
                enabled: false,
            })
            .collect();
        Self {
            threads: ThreadTable::new(),
            cores,
            injector: FaultInjector::from_config(faults),
            stats: SimStats::new(config.num_cores),
            finished: false,
        }
    }

    /// The thread table.
    pub const fn threads(&self) -> &ThreadTable {
        &self.threads
    }

    /// The thread table, mutably.
    pub const fn threads_mut(&mut self) -> &mut ThreadTable {
        &mut self.threads
    }

    /// Number of cores.
    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    /// Hart slots of `core`.
    pub fn hart_threads(&self, core: usize) -> &[Option<ThreadId>] {
        self.cores.get(core).map_or(&[], |c| c.harts.as_slice())
    }

    /// Returns `true` if `core` is enabled for ticking.
    pub fn core_enabled(&self, core: usize) -> bool {
        self.cores.get(core).is_some_and(|c| c.enabled)
    }

    /// Run statistics.
    pub const fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Returns `true` once termination has been confirmed.
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Queues a thread starting at `start` with its stack at `stack_top`.
    ///
    /// The thread owns no segment; the caller provides its stack.
    pub fn create_thread(&mut self, parent: Option<ThreadId>, start: u64, stack_top: u64) -> ThreadId {
        self.threads.create(parent, start, stack_top, None)
    }

    /// Queues a thread with its own stack/TLS segment and `arg` in `a0`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::ThreadMemExhausted` if no thread segment fits.
    pub fn spawn_thread(
        &mut self,
        memory: &mut Memory,
        parent: Option<ThreadId>,
        start: u64,
        arg: u64,
    ) -> Result<ThreadId, SimError> {
        spawn_in(&mut self.threads, memory, parent, start, arg)
    }

    /// Creates the first thread of the program.
    ///
    /// `a0` holds `argc` and `a1` the stack top; the stack and thread pointers sit
    /// below the TLS area, and `gp` and `fp` receive `global_pointer`.
    ///
    /// # Errors
    ///
    /// Returns `MemFault::ThreadMemExhausted` if no thread segment fits.
    pub fn init_main_thread(
        &mut self,
        memory: &mut Memory,
        start: u64,
        argc: u64,
        global_pointer: u64,
    ) -> Result<ThreadId, SimError> {
        let (seg, top) = thread_segment(memory)?;
        let tls = memory.segments().tls_info().size;
        let tid = self.threads.create(None, start, top.saturating_sub(tls), Some(seg));
        if let Some(thread) = self.threads.get_mut(tid) {
            thread.regs.write(REG_A0, argc);
            thread.regs.write(REG_A1, top);
            thread.regs.write(REG_GP, global_pointer);
            thread.regs.write(REG_FP, global_pointer);
        }
        info!(tid = %tid, pc = format_args!("{start:#x}"), stack_top = format_args!("{top:#x}"), "main thread created");
        Ok(tid)
    }

    /// Processes one tick.
    ///
    /// # Errors
    ///
    /// `SchedError::ExecutorCount` if `executors` does not hold one executor per
    /// core, and any fatal fault raised while ticking.
    ///
    /// # Returns
    ///
    /// `false` once the run has terminated.
    pub fn tick(
        &mut self,
        cycle: u64,
        memory: &mut Memory,
        executors: &mut [Box<dyn Executor>],
    ) -> Result<bool, SimError> {
        if self.finished {
            return Ok(false);
        }
        if executors.len() != self.cores.len() {
            return Err(SchedError::ExecutorCount {
                cores: self.cores.len(),
                executors: executors.len(),
            }
            .into());
        }
        self.stats.cycles += 1;
        memory.tick(cycle)?;

        for (core, executor) in executors.iter_mut().enumerate() {
            let slot = &mut self.cores[core];

            if !self.threads.ready_is_empty() {
                if let Some(hart) = slot.harts.iter().position(Option::is_none) {
                    if let Some(tid) = self.threads.pop_ready(core)? {
                        slot.harts[hart] = Some(tid);
                        slot.enabled = true;
                        debug!(tid = %tid, core, hart, cycle, "thread assigned");
                    }
                }
            }

            let mut changes = Vec::new();
            if slot.enabled {
                let mut ctx = CoreContext::new(core, &slot.harts, &mut self.threads, memory);
                let progress = executor.clock_tick(cycle, &mut ctx)?;
                changes = ctx.into_changes();
                if !progress {
                    executor.teardown_coprocessor();
                    self.stats.fold_core(core, executor.take_stats());
                    slot.enabled = false;
                    debug!(core, cycle, "core stopped");
                }
            }

            for (hart, tid, change) in changes {
                self.dispatch(core, hart, tid, change, memory)?;
            }

            let slot = &mut self.cores[core];
            if slot.harts.iter().all(Option::is_none) {
                slot.enabled = false;
            }
        }

        let _ = self.threads.check_blocked();

        if let Some(injector) = self.injector.as_mut() {
            if injector.due(cycle) {
                let _ = injector.inject(memory, executors)?;
            }
        }

        let idle = self.cores.iter().all(|c| !c.enabled);
        if idle
            && self.threads.ready_is_empty()
            && self.threads.blocked_is_empty()
            && memory.outstanding() == 0
            && !self.threads.completed().is_empty()
        {
            self.finish(cycle, memory, executors)?;
            return Ok(false);
        }
        Ok(true)
    }

    fn dispatch(
        &mut self,
        core: usize,
        hart: usize,
        tid: ThreadId,
        change: ThreadChange,
        memory: &mut Memory,
    ) -> Result<(), SimError> {
        let on_hart = self.cores[core].harts.get(hart).copied().flatten();
        if on_hart != Some(tid) {
            return Err(SchedError::NotOnCore { tid, core }.into());
        }
        match change {
            ThreadChange::Exit => {
                self.threads.complete(tid, core, ThreadState::Done)?;
                if let Some(seg) = self.threads.get(tid).and_then(|t| t.segment) {
                    let _ = memory.release_thread_mem(seg);
                }
                self.stats.threads_done += 1;
            }
            ThreadChange::Yield => self.threads.requeue(tid, core)?,
            ThreadChange::Join(target) => self.threads.block(tid, core, target)?,
            ThreadChange::Migrate(dest) => {
                self.threads.complete(tid, core, ThreadState::Migrated)?;
                self.stats.threads_migrated += 1;
                info!(tid = %tid, %dest, "thread migrated");
            }
        }
        self.cores[core].harts[hart] = None;
        Ok(())
    }

    fn finish(
        &mut self,
        cycle: u64,
        memory: &mut Memory,
        executors: &mut [Box<dyn Executor>],
    ) -> Result<(), SimError> {
        if let Some(injector) = self.injector.as_mut() {
            let _ = injector.inject(memory, executors)?;
        }
        for (core, executor) in executors.iter_mut().enumerate() {
            self.stats.fold_core(core, executor.take_stats());
            if self.cores[core].harts.iter().any(Option::is_some) {
                warn!(core, "core stopped with threads still assigned");
            }
        }
        self.stats.mem = memory.stats();
        self.finished = true;
        let _ = memory.write_dumps(DumpStage::Final)?;
        info!(
            cycle,
            done = self.stats.threads_done,
            migrated = self.stats.threads_migrated,
            "simulation terminated"
        );
        Ok(())
    }
}
