//! Configuration system for the simulator core.
//!
//! This module defines all configuration structures and enums used to parameterize
//! the memory subsystem and the scheduler. It provides:
//! 1. **Defaults:** Baseline sizes for memory, pages, the translation cache and the heap.
//! 2. **Structures:** Hierarchical config for memory, scheduling, fault injection and node identity.
//! 3. **Enums:** Memory backend, controller timing model and fault kinds.
//!
//! Configuration is supplied as JSON (`Config::from_json` / `Config::from_file`) or
//! built from `Config::default()`. Every value is read once at construction.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::common::error::ConfigError;

/// Default configuration constants for the simulator core.
mod defaults {
    /// Total simulated memory (64 MiB).
    pub const MEM_SIZE: u64 = 64 * 1024 * 1024;

    /// Page size in bytes (256 KiB).
    ///
    /// Pages are large because the page table only models capacity and
    /// first-touch ordering, not a hardware walk.
    pub const PAGE_SIZE: u64 = 262_144;

    /// Translation cache entry count.
    pub const TLB_SIZE: usize = 512;

    /// Per-thread stack size (1 MiB).
    pub const STACK_SIZE: u64 = 1024 * 1024;

    /// Fixed controller latency in cycles.
    pub const CONTROLLER_LATENCY: u64 = 10;

    /// CAS (Column Access Strobe) latency in DRAM cycles.
    pub const T_CAS: u64 = 14;

    /// RAS (Row Access Strobe) latency in DRAM cycles.
    pub const T_RAS: u64 = 14;

    /// Precharge latency in DRAM cycles.
    pub const T_PRE: u64 = 14;

    /// Cores per node.
    pub const NUM_CORES: usize = 1;

    /// Harts per core.
    pub const NUM_HARTS: usize = 1;

    /// Fault width in bits ("single").
    pub const FAULT_WIDTH: u32 = 1;

    /// Seed for the fault injector's generator. Must be non-zero.
    pub const FAULT_SEED: u64 = 0x2545_F491_4F6C_DD1D;

    /// Bit position of the view bit in a virtual address.
    pub const VIEW_BIT: u32 = 62;

    /// Bit position of the zone field.
    pub const ZONE_SHIFT: u32 = 56;

    /// Width of the zone field.
    pub const ZONE_BITS: u32 = 4;

    /// Bit position of the precinct field.
    pub const PRECINCT_SHIFT: u32 = 48;

    /// Width of the precinct field.
    pub const PRECINCT_BITS: u32 = 8;

    /// Scratchpad base address.
    pub const SCRATCHPAD_BASE: u64 = 0x0300_0000_0000_0000;

    /// Scratchpad allocation granule in bytes.
    pub const SCRATCHPAD_CHUNK: u64 = 512;

    /// Scratchpad size (1024 chunks).
    pub const SCRATCHPAD_SIZE: u64 = SCRATCHPAD_CHUNK * 1024;
}

/// Which memory backend services physical accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum BackendKind {
    /// Direct access into a local byte array.
    #[default]
    Local,
    /// Deferred through a timed memory controller.
    Controller,
    /// Forwarded to a remote node over a link.
    Remote,
}

/// Timing model of the controller backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ControllerKind {
    /// Fixed latency per access.
    #[default]
    Simple,
    /// Row-buffer aware latency.
    #[serde(alias = "DRAM")]
    Dram,
}

/// Class of fault the injector may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    /// Corrupt an instruction in flight.
    Decode,
    /// Corrupt backing memory.
    Mem,
    /// Corrupt a register.
    Reg,
    /// Corrupt an ALU result.
    Alu,
    /// Any of the above, chosen per injection.
    All,
}

impl FaultKind {
    /// The concrete kinds `All` expands to.
    pub const CONCRETE: [Self; 4] = [Self::Decode, Self::Mem, Self::Reg, Self::Alu];
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Memory subsystem parameters.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Core and hart counts.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Fault injection.
    #[serde(default)]
    pub faults: FaultConfig,
    /// Node identity and address layout for remote memory.
    #[serde(default)]
    pub node: NodeConfig,
}

impl Config {
    /// Parses and validates a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Json` for malformed input and `ConfigError::Invalid`
    /// when a value is out of range.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise as `from_json`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Checks cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mem = &self.memory;
        if !mem.page_size.is_power_of_two() || mem.page_size < 8 {
            return Err(invalid(format!(
                "memory.page_size must be a power of two >= 8, got {}",
                mem.page_size
            )));
        }
        if mem.mem_size < mem.page_size {
            return Err(invalid(format!(
                "memory.mem_size ({}) must hold at least one page ({})",
                mem.mem_size, mem.page_size
            )));
        }
        if mem.tlb_size == 0 {
            return Err(invalid("memory.tlb_size must be non-zero".into()));
        }
        if mem.heap_limit() > mem.mem_size {
            return Err(invalid(format!(
                "memory.max_heap_size ({}) exceeds memory size ({})",
                mem.heap_limit(),
                mem.mem_size
            )));
        }
        if let Some(pad) = &mem.scratchpad {
            pad.validate()?;
        }
        for range in &mem.dump_ranges {
            range.validate()?;
        }
        let sched = &self.scheduler;
        if sched.num_cores == 0 || sched.num_harts == 0 {
            return Err(invalid(
                "scheduler.num_cores and scheduler.num_harts must be non-zero".into(),
            ));
        }
        if sched.num_harts > crate::common::constants::MAX_HARTS {
            return Err(invalid(format!(
                "scheduler.num_harts ({}) exceeds the limit of {}",
                sched.num_harts,
                crate::common::constants::MAX_HARTS
            )));
        }
        if !(1..=64).contains(&self.faults.width) {
            return Err(invalid(format!(
                "faults.width must be between 1 and 64 bits, got {}",
                self.faults.width
            )));
        }
        if self.faults.seed == 0 {
            return Err(invalid("faults.seed must be non-zero".into()));
        }
        if self.faults.interval == Some(0) {
            return Err(invalid("faults.interval must be non-zero when set".into()));
        }
        if self.faults.enabled && self.faults.kinds.is_empty() {
            return Err(invalid("faults.enabled requires at least one fault kind".into()));
        }
        self.node.validate()
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::Invalid(msg)
}

/// Memory subsystem configuration.
///
/// Specifies the memory and page sizes, translation cache capacity, heap limit
/// and which backend services physical accesses.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Total simulated memory in bytes.
    #[serde(default = "MemoryConfig::default_mem_size")]
    pub mem_size: u64,

    /// Page size in bytes; a power of two.
    #[serde(default = "MemoryConfig::default_page_size")]
    pub page_size: u64,

    /// Translation cache entry count.
    #[serde(default = "MemoryConfig::default_tlb_size")]
    pub tlb_size: usize,

    /// Maximum heap size in bytes. A quarter of `mem_size` when unset.
    #[serde(default)]
    pub max_heap_size: Option<u64>,

    /// Per-thread stack size in bytes.
    #[serde(default = "MemoryConfig::default_stack_size")]
    pub stack_size: u64,

    /// Backend servicing physical accesses.
    #[serde(default)]
    pub backend: BackendKind,

    /// Controller timing, used by the `Controller` backend.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// On-node scratchpad; none when unset.
    #[serde(default)]
    pub scratchpad: Option<ScratchpadConfig>,

    /// Named ranges dumped to `{name}.dump.init` before the first tick and
    /// `{name}.dump.final` at termination.
    #[serde(default)]
    pub dump_ranges: Vec<DumpRange>,

    /// Directory the dump files are written to.
    #[serde(default = "MemoryConfig::default_dump_dir")]
    pub dump_dir: PathBuf,
}

impl MemoryConfig {
    fn default_mem_size() -> u64 {
        defaults::MEM_SIZE
    }

    fn default_page_size() -> u64 {
        defaults::PAGE_SIZE
    }

    fn default_tlb_size() -> usize {
        defaults::TLB_SIZE
    }

    fn default_stack_size() -> u64 {
        defaults::STACK_SIZE
    }

    fn default_dump_dir() -> PathBuf {
        PathBuf::from(".")
    }

    /// Returns the effective maximum heap size.
    pub fn heap_limit(&self) -> u64 {
        self.max_heap_size.unwrap_or(self.mem_size / 4)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            mem_size: defaults::MEM_SIZE,
            page_size: defaults::PAGE_SIZE,
            tlb_size: defaults::TLB_SIZE,
            max_heap_size: None,
            stack_size: defaults::STACK_SIZE,
            backend: BackendKind::default(),
            controller: ControllerConfig::default(),
            scratchpad: None,
            dump_ranges: Vec::new(),
            dump_dir: Self::default_dump_dir(),
        }
    }
}

/// A scratchpad: a chunk-allocated address range served without translation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScratchpadConfig {
    /// First scratchpad address.
    #[serde(default = "ScratchpadConfig::default_base")]
    pub base: u64,

    /// Size in bytes; a multiple of `chunk_size`.
    #[serde(default = "ScratchpadConfig::default_size")]
    pub size: u64,

    /// Allocation granule in bytes.
    #[serde(default = "ScratchpadConfig::default_chunk_size")]
    pub chunk_size: u64,
}

impl ScratchpadConfig {
    fn default_base() -> u64 {
        defaults::SCRATCHPAD_BASE
    }

    fn default_size() -> u64 {
        defaults::SCRATCHPAD_SIZE
    }

    fn default_chunk_size() -> u64 {
        defaults::SCRATCHPAD_CHUNK
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.size == 0 || self.size % self.chunk_size != 0 {
            return Err(invalid(format!(
                "memory.scratchpad.size ({}) must be a non-zero multiple of chunk_size ({})",
                self.size, self.chunk_size
            )));
        }
        if self.base.checked_add(self.size).is_none() {
            return Err(invalid(format!(
                "memory.scratchpad at {:#x} with size {} wraps the address space",
                self.base, self.size
            )));
        }
        Ok(())
    }
}

impl Default for ScratchpadConfig {
    fn default() -> Self {
        Self {
            base: defaults::SCRATCHPAD_BASE,
            size: defaults::SCRATCHPAD_SIZE,
            chunk_size: defaults::SCRATCHPAD_CHUNK,
        }
    }
}

/// A named virtual address range dumped to a file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DumpRange {
    /// File stem of the dump.
    pub name: String,
    /// First virtual address.
    pub base: u64,
    /// Bytes to dump.
    pub size: u64,
}

impl DumpRange {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(invalid(format!(
                "memory.dump_ranges name '{}' must be a non-empty file name",
                self.name
            )));
        }
        if self.size == 0 {
            return Err(invalid(format!("memory.dump_ranges '{}' has size 0", self.name)));
        }
        Ok(())
    }
}

/// Timing parameters for the controller backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Latency model.
    #[serde(default)]
    pub kind: ControllerKind,

    /// Fixed latency for the `Simple` model.
    #[serde(default = "ControllerConfig::default_latency")]
    pub latency: u64,

    /// CAS latency (column access strobe)
    #[serde(default = "ControllerConfig::default_t_cas")]
    pub t_cas: u64,

    /// RAS latency (row access strobe)
    #[serde(default = "ControllerConfig::default_t_ras")]
    pub t_ras: u64,

    /// Precharge latency
    #[serde(default = "ControllerConfig::default_t_pre")]
    pub t_pre: u64,
}

impl ControllerConfig {
    fn default_latency() -> u64 {
        defaults::CONTROLLER_LATENCY
    }

    fn default_t_cas() -> u64 {
        defaults::T_CAS
    }

    fn default_t_ras() -> u64 {
        defaults::T_RAS
    }

    fn default_t_pre() -> u64 {
        defaults::T_PRE
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            kind: ControllerKind::default(),
            latency: defaults::CONTROLLER_LATENCY,
            t_cas: defaults::T_CAS,
            t_ras: defaults::T_RAS,
            t_pre: defaults::T_PRE,
        }
    }
}

/// Core and hart counts for one node.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Number of cores.
    #[serde(default = "SchedulerConfig::default_num_cores")]
    pub num_cores: usize,

    /// Harts per core.
    #[serde(default = "SchedulerConfig::default_num_harts")]
    pub num_harts: usize,
}

impl SchedulerConfig {
    fn default_num_cores() -> usize {
        defaults::NUM_CORES
    }

    fn default_num_harts() -> usize {
        defaults::NUM_HARTS
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_cores: defaults::NUM_CORES,
            num_harts: defaults::NUM_HARTS,
        }
    }
}

/// Fault injection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FaultConfig {
    /// Whether faults are injected at all.
    #[serde(default)]
    pub enabled: bool,

    /// Kinds of fault to choose from.
    #[serde(default)]
    pub kinds: Vec<FaultKind>,

    /// Width in bits of each injected fault: `"single"`, `"word"` or a bit count.
    #[serde(
        default = "FaultConfig::default_width",
        deserialize_with = "deserialize_fault_width"
    )]
    pub width: u32,

    /// Inject every `interval` ticks in addition to the injection at termination.
    #[serde(default)]
    pub interval: Option<u64>,

    /// Seed for the injector's xorshift generator.
    #[serde(default = "FaultConfig::default_seed")]
    pub seed: u64,
}

impl FaultConfig {
    fn default_width() -> u32 {
        defaults::FAULT_WIDTH
    }

    fn default_seed() -> u64 {
        defaults::FAULT_SEED
    }

    /// Returns the configured kinds with `All` expanded and duplicates removed.
    pub fn concrete_kinds(&self) -> Vec<FaultKind> {
        let mut kinds = Vec::new();
        for kind in &self.kinds {
            let expanded: &[FaultKind] = match kind {
                FaultKind::All => &FaultKind::CONCRETE,
                other => std::slice::from_ref(other),
            };
            for k in expanded {
                if !kinds.contains(k) {
                    kinds.push(*k);
                }
            }
        }
        kinds
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kinds: Vec::new(),
            width: defaults::FAULT_WIDTH,
            interval: None,
            seed: defaults::FAULT_SEED,
        }
    }
}

/// Decodes a fault width name: `"single"` is one bit, `"word"` is eight, and
/// anything else must be a decimal bit count between 1 and 64.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` for unknown names and out-of-range counts.
pub fn decode_fault_width(name: &str) -> Result<u32, ConfigError> {
    match name.trim() {
        "single" => Ok(1),
        "word" => Ok(8),
        other => {
            let bits: u32 = other
                .parse()
                .map_err(|_| invalid(format!("unknown fault width '{other}'")))?;
            if (1..=64).contains(&bits) {
                Ok(bits)
            } else {
                Err(invalid(format!("fault width {bits} is not between 1 and 64")))
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WidthRepr {
    Bits(u32),
    Name(String),
}

fn deserialize_fault_width<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match WidthRepr::deserialize(deserializer)? {
        WidthRepr::Bits(bits) => Ok(bits),
        WidthRepr::Name(name) => decode_fault_width(&name).map_err(serde::de::Error::custom),
    }
}

/// Node identity and the address fields that encode a node.
///
/// Only consulted when the memory backend is `Remote`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// This node's zone.
    #[serde(default)]
    pub zone: u32,

    /// This node's precinct.
    #[serde(default)]
    pub precinct: u32,

    /// Bit position of the zone field.
    #[serde(default = "NodeConfig::default_zone_shift")]
    pub zone_shift: u32,

    /// Width of the zone field.
    #[serde(default = "NodeConfig::default_zone_bits")]
    pub zone_bits: u32,

    /// Bit position of the precinct field.
    #[serde(default = "NodeConfig::default_precinct_shift")]
    pub precinct_shift: u32,

    /// Width of the precinct field.
    #[serde(default = "NodeConfig::default_precinct_bits")]
    pub precinct_bits: u32,

    /// Bit position of the view bit; a set view bit marks a globally addressed location.
    #[serde(default = "NodeConfig::default_view_bit")]
    pub view_bit: u32,
}

impl NodeConfig {
    fn default_zone_shift() -> u32 {
        defaults::ZONE_SHIFT
    }

    fn default_zone_bits() -> u32 {
        defaults::ZONE_BITS
    }

    fn default_precinct_shift() -> u32 {
        defaults::PRECINCT_SHIFT
    }

    fn default_precinct_bits() -> u32 {
        defaults::PRECINCT_BITS
    }

    fn default_view_bit() -> u32 {
        defaults::VIEW_BIT
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("zone", self.zone_shift, self.zone_bits),
            ("precinct", self.precinct_shift, self.precinct_bits),
            ("view", self.view_bit, 1),
        ];
        for (name, shift, bits) in fields {
            if bits == 0 || bits >= 32 || shift + bits > 64 {
                return Err(invalid(format!(
                    "node.{name} field at bit {shift} with width {bits} does not fit a 64-bit address"
                )));
            }
        }
        if u64::from(self.zone) >> self.zone_bits != 0 {
            return Err(invalid(format!(
                "node.zone {} does not fit in {} bits",
                self.zone, self.zone_bits
            )));
        }
        if u64::from(self.precinct) >> self.precinct_bits != 0 {
            return Err(invalid(format!(
                "node.precinct {} does not fit in {} bits",
                self.precinct, self.precinct_bits
            )));
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            zone: 0,
            precinct: 0,
            zone_shift: defaults::ZONE_SHIFT,
            zone_bits: defaults::ZONE_BITS,
            precinct_shift: defaults::PRECINCT_SHIFT,
            precinct_bits: defaults::PRECINCT_BITS,
            view_bit: defaults::VIEW_BIT,
        }
    }
}
