//! Simulator: owns the memory subsystem, the scheduler and the per-core executors.
//!
//! Keeping the three side by side lets one tick borrow each of them mutably
//! without the scheduler owning memory it only drives.

use tracing::{error, info};

use crate::common::{SchedError, SimError};
use crate::config::Config;
use crate::core::scheduler::{Executor, Scheduler};
use crate::core::thread::{ThreadId, ThreadTable};
use crate::soc::builder::build_memory;
use crate::soc::memory::{DumpStage, Memory};
use crate::soc::memory::remote::RemoteLink;
use crate::stats::SimStats;

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// The scheduler confirmed termination after this many ticks.
    Finished {
        /// Ticks processed.
        cycles: u64,
    },
    /// The cycle limit was reached first.
    CycleLimit {
        /// Ticks processed.
        cycles: u64,
    },
}

/// Top-level simulator of one node.
#[derive(Debug)]
pub struct Simulator {
    memory: Memory,
    scheduler: Scheduler,
    executors: Vec<Box<dyn Executor>>,
    cycle: u64,
    halted: bool,
}

impl Simulator {
    /// Creates a simulator over an already built memory subsystem.
    ///
    /// # Errors
    ///
    /// `SchedError::ExecutorCount` unless there is one executor per configured core.
    pub fn new(config: &Config, memory: Memory, executors: Vec<Box<dyn Executor>>) -> Result<Self, SimError> {
        let cores = config.scheduler.num_cores;
        if executors.len() != cores {
            return Err(SchedError::ExecutorCount {
                cores,
                executors: executors.len(),
            }
            .into());
        }
        Ok(Self {
            memory,
            scheduler: Scheduler::new(&config.scheduler, &config.faults),
            executors,
            cycle: 0,
            halted: false,
        })
    }

    /// Builds memory from `config` and creates the simulator.
    ///
    /// # Errors
    ///
    /// Configuration and allocation errors from building memory, or an executor
    /// count mismatch.
    pub fn from_config(
        config: &Config,
        link: Option<Box<dyn RemoteLink>>,
        executors: Vec<Box<dyn Executor>>,
    ) -> Result<Self, SimError> {
        let memory = build_memory(config, link)?;
        Self::new(config, memory, executors)
    }

    /// The memory subsystem.
    pub const fn memory(&self) -> &Memory {
        &self.memory
    }

    /// The memory subsystem, mutably.
    pub const fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    /// The scheduler.
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The thread table.
    pub const fn threads(&self) -> &ThreadTable {
        self.scheduler.threads()
    }

    /// Run statistics.
    pub const fn stats(&self) -> &SimStats {
        self.scheduler.stats()
    }

    /// Ticks processed so far.
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Returns `true` after a fatal error stopped the run.
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Queues a thread with a caller-provided stack.
    pub fn create_thread(&mut self, parent: Option<ThreadId>, start: u64, stack_top: u64) -> ThreadId {
        self.scheduler.create_thread(parent, start, stack_top)
    }

    /// Queues a thread with its own stack/TLS segment.
    ///
    /// # Errors
    ///
    /// `MemFault::ThreadMemExhausted` if no thread segment fits.
    pub fn spawn_thread(&mut self, parent: Option<ThreadId>, start: u64, arg: u64) -> Result<ThreadId, SimError> {
        self.scheduler.spawn_thread(&mut self.memory, parent, start, arg)
    }

    /// Creates the main thread.
    ///
    /// # Errors
    ///
    /// `MemFault::ThreadMemExhausted` if no thread segment fits.
    pub fn init_main_thread(&mut self, start: u64, argc: u64, global_pointer: u64) -> Result<ThreadId, SimError> {
        self.scheduler
            .init_main_thread(&mut self.memory, start, argc, global_pointer)
    }

    /// Advances the simulation by one tick.
    ///
    /// The first tick writes the `dump.init` file of every configured dump range
    /// before scheduling. A fatal error is reported with the segment layout and
    /// halts the simulator; later ticks return `Ok(false)`.
    ///
    /// # Errors
    ///
    /// The fatal error that halted the run.
    ///
    /// # Returns
    ///
    /// `false` once the run has ended.
    pub fn tick(&mut self) -> Result<bool, SimError> {
        if self.halted {
            return Ok(false);
        }
        let result = self.step();
        self.cycle += 1;
        match result {
            Ok(running) => Ok(running),
            Err(err) => {
                self.halt(&err);
                Err(err)
            }
        }
    }

    /// Ticks until termination or until `max_cycles` ticks have run.
    ///
    /// # Errors
    ///
    /// The first fatal error.
    pub fn run(&mut self, max_cycles: Option<u64>) -> Result<RunOutcome, SimError> {
        loop {
            if max_cycles.is_some_and(|max| self.cycle >= max) {
                info!(cycles = self.cycle, "cycle limit reached");
                return Ok(RunOutcome::CycleLimit { cycles: self.cycle });
            }
            if !self.tick()? {
                return Ok(RunOutcome::Finished { cycles: self.cycle });
            }
        }
    }

    fn step(&mut self) -> Result<bool, SimError> {
        if self.cycle == 0 {
            let _ = self.memory.write_dumps(DumpStage::Init)?;
        }
        self.scheduler
            .tick(self.cycle, &mut self.memory, &mut self.executors)
    }

    /// Reports `err` as fatal and stops the run; later ticks return `Ok(false)`.
    ///
    /// The error is logged and printed to stderr with the segment layout. `tick`
    /// does this on its own; setup that fails outside a tick calls it directly.
    pub fn halt(&mut self, err: &SimError) {
        error!(cycle = self.cycle, error = %err, "fatal error, halting");
        eprintln!("{}", self.fatal_report(err));
        self.halted = true;
    }

    /// The text `halt` prints.
    pub fn fatal_report(&self, err: &SimError) -> String {
        format!(
            "\n[!] FATAL at cycle {}: {err}\n[!] segment layout:\n{}",
            self.cycle,
            self.memory.dump_segments()
        )
    }
}
