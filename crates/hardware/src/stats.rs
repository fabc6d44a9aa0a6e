//! Simulation statistics collection and reporting.
//!
//! This module tracks the metrics of a run. It provides:
//! 1. **Memory:** Bytes moved, translation cache hits/misses, page assignments and
//!    atomic/exclusive-access outcomes.
//! 2. **Cores:** Per-core cycle, busy-cycle, retired-op and stall counters folded in
//!    whenever a core stops and at termination.
//! 3. **Threads:** How many threads completed locally and how many migrated away.

use std::ops::AddAssign;
use std::time::Instant;

/// Memory subsystem counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemStats {
    /// Bytes delivered by reads, atomics and load-reserves.
    pub bytes_read: u64,
    /// Bytes accepted by writes, atomics and store-conditionals.
    pub bytes_written: u64,
    /// Translation cache hits.
    pub tlb_hits: u64,
    /// Translation cache misses.
    pub tlb_misses: u64,
    /// Physical pages assigned on first touch.
    pub pages_assigned: u64,
    /// Accesses split across a page boundary.
    pub split_accesses: u64,
    /// Reservations registered by load-reserve.
    pub reservations: u64,
    /// Load-reserves refused because the address was already reserved.
    pub reservation_conflicts: u64,
    /// Successful store-conditionals.
    pub sc_successes: u64,
    /// Failed store-conditionals.
    pub sc_failures: u64,
    /// Atomic memory operations issued.
    pub amos: u64,
    /// Exclusive-future markers removed by writes.
    pub futures_revoked: u64,
    /// Faults injected into backing memory.
    pub faults_injected: u64,
    /// Reads, writes and atomics served by the scratchpad.
    pub scratchpad_accesses: u64,
}

impl AddAssign for MemStats {
    fn add_assign(&mut self, rhs: Self) {
        self.bytes_read += rhs.bytes_read;
        self.bytes_written += rhs.bytes_written;
        self.tlb_hits += rhs.tlb_hits;
        self.tlb_misses += rhs.tlb_misses;
        self.pages_assigned += rhs.pages_assigned;
        self.split_accesses += rhs.split_accesses;
        self.reservations += rhs.reservations;
        self.reservation_conflicts += rhs.reservation_conflicts;
        self.sc_successes += rhs.sc_successes;
        self.sc_failures += rhs.sc_failures;
        self.amos += rhs.amos;
        self.futures_revoked += rhs.futures_revoked;
        self.faults_injected += rhs.faults_injected;
        self.scratchpad_accesses += rhs.scratchpad_accesses;
    }
}

/// Counters reported by one core's executor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoreStats {
    /// Cycles the core was ticked.
    pub cycles: u64,
    /// Cycles with at least one hart running a thread.
    pub cycles_busy: u64,
    /// Operations retired.
    pub ops_retired: u64,
    /// Hart-cycles spent waiting on memory.
    pub stalls_mem: u64,
    /// Faults injected into this core.
    pub faults_injected: u64,
}

impl AddAssign for CoreStats {
    fn add_assign(&mut self, rhs: Self) {
        self.cycles += rhs.cycles;
        self.cycles_busy += rhs.cycles_busy;
        self.ops_retired += rhs.ops_retired;
        self.stalls_mem += rhs.stalls_mem;
        self.faults_injected += rhs.faults_injected;
    }
}

/// Section names for selective stats output.
///
/// Valid section identifiers: `"summary"`, `"cores"`, `"memory"`, `"threads"`.
/// Pass an empty slice to `print_sections` to print all sections.
pub const STATS_SECTIONS: &[&str] = &["summary", "cores", "memory", "threads"];

/// Statistics of a whole run.
#[derive(Clone, Debug)]
pub struct SimStats {
    start_time: Instant,
    /// Scheduler ticks processed.
    pub cycles: u64,
    /// Per-core counters, indexed by core.
    pub cores: Vec<CoreStats>,
    /// Memory subsystem counters.
    pub mem: MemStats,
    /// Threads that finished on this node.
    pub threads_done: u64,
    /// Threads that migrated to another node.
    pub threads_migrated: u64,
}

impl SimStats {
    /// Creates empty statistics for `num_cores` cores; the host clock starts now.
    pub fn new(num_cores: usize) -> Self {
        Self {
            start_time: Instant::now(),
            cycles: 0,
            cores: vec![CoreStats::default(); num_cores],
            mem: MemStats::default(),
            threads_done: 0,
            threads_migrated: 0,
        }
    }

    /// Adds `stats` into the counters of `core`.
    pub fn fold_core(&mut self, core: usize, stats: CoreStats) {
        if let Some(slot) = self.cores.get_mut(core) {
            *slot += stats;
        }
    }

    /// Sum over all cores.
    pub fn core_total(&self) -> CoreStats {
        let mut total = CoreStats::default();
        for core in &self.cores {
            total += *core;
        }
        total
    }

    /// Prints only the requested statistics sections to stdout.
    ///
    /// Each element of `sections` should be one of `"summary"`, `"cores"`,
    /// `"memory"` or `"threads"`. Pass an empty slice to print all sections.
    pub fn print_sections(&self, sections: &[String]) {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);
        let seconds = self.start_time.elapsed().as_secs_f64().max(f64::EPSILON);
        let cyc = self.cycles.max(1);
        let total = self.core_total();

        if want("summary") {
            let khz = (self.cycles as f64 / seconds) / 1000.0;
            let opc = total.ops_retired as f64 / cyc as f64;
            println!("\n==========================================================");
            println!("HART SCHEDULER SIMULATION STATISTICS");
            println!("==========================================================");
            println!("host_seconds             {seconds:.4} s");
            println!("sim_cycles               {}", self.cycles);
            println!("sim_freq                 {khz:.2} kHz");
            println!("sim_ops                  {}", total.ops_retired);
            println!("sim_ops_per_cycle        {opc:.4}");
            println!("----------------------------------------------------------");
        }
        if want("cores") {
            println!("CORE BREAKDOWN");
            for (i, core) in self.cores.iter().enumerate() {
                let busy = (core.cycles_busy as f64 / core.cycles.max(1) as f64) * 100.0;
                println!(
                    "  core{i:<3} cycles: {:<10} | busy: {busy:>6.2}% | ops: {:<10} | mem_stalls: {}",
                    core.cycles, core.ops_retired, core.stalls_mem
                );
            }
            println!("----------------------------------------------------------");
        }
        if want("memory") {
            let m = &self.mem;
            let lookups = m.tlb_hits + m.tlb_misses;
            let miss_rate = if lookups > 0 {
                (m.tlb_misses as f64 / lookups as f64) * 100.0
            } else {
                0.0
            };
            println!("MEMORY");
            println!("  bytes.read             {}", m.bytes_read);
            println!("  bytes.written          {}", m.bytes_written);
            println!(
                "  tlb    accesses: {lookups:<10} | hits: {:<10} | miss_rate: {miss_rate:.2}%",
                m.tlb_hits
            );
            println!("  pages.assigned         {}", m.pages_assigned);
            println!("  accesses.split         {}", m.split_accesses);
            println!("  lr.reservations        {}", m.reservations);
            println!("  lr.conflicts           {}", m.reservation_conflicts);
            println!("  sc.success             {}", m.sc_successes);
            println!("  sc.failure             {}", m.sc_failures);
            println!("  amo.count              {}", m.amos);
            println!("  future.revoked         {}", m.futures_revoked);
            println!("  scratchpad.accesses    {}", m.scratchpad_accesses);
            println!("  faults.injected        {}", m.faults_injected + total.faults_injected);
            println!("----------------------------------------------------------");
        }
        if want("threads") {
            println!("THREADS");
            println!("  threads.done           {}", self.threads_done);
            println!("  threads.migrated       {}", self.threads_migrated);
        }
        println!("==========================================================");
    }

    /// Prints all statistics sections to stdout.
    ///
    /// Equivalent to `print_sections(&[])`.
    pub fn print(&self) {
        self.print_sections(&[]);
    }
}
