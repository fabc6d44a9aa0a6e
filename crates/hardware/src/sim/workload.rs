//! Workload Description and Installation.
//!
//! A workload is a JSON document describing what the loader would normally
//! produce from a program image:
//! 1. **Static layout:** Segments registered before the heap is set up.
//! 2. **TLS template:** Address and size of the thread-local storage image.
//! 3. **Programs:** Named op lists for the scripted executor, and which one runs first.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use serde::Deserialize;
use tracing::info;

use crate::common::{ConfigError, SimError};
use crate::core::thread::ThreadId;

use super::script::{Op, Program, ProgramSet, entry_pc};
use super::simulator::Simulator;

/// A fixed region registered at load time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct StaticSegment {
    /// First address.
    pub base: u64,
    /// Size in bytes.
    pub size: u64,
    /// Round the size up to this alignment, expanding any overlapping segment.
    #[serde(default)]
    pub align: Option<u64>,
}

/// Thread-local storage template.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TlsTemplate {
    /// Template address.
    pub base: u64,
    /// Template size in bytes.
    pub size: u64,
}

/// A scripted workload.
#[derive(Clone, Debug, Deserialize)]
pub struct Workload {
    /// Segments to register before the heap.
    #[serde(default)]
    pub static_segments: Vec<StaticSegment>,
    /// TLS template, if the program has one.
    #[serde(default)]
    pub tls: Option<TlsTemplate>,
    /// Value for the main thread's `gp` and `fp`.
    #[serde(default)]
    pub global_pointer: u64,
    /// Value for the main thread's `a0`.
    #[serde(default)]
    pub argc: u64,
    /// Name of the program the main thread runs.
    pub main: String,
    /// Programs by name.
    pub programs: BTreeMap<String, Vec<Op>>,
}

impl Workload {
    /// Parses a workload from JSON.
    ///
    /// # Errors
    ///
    /// `ConfigError::Json` for malformed input.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads and parses a workload file.
    ///
    /// # Errors
    ///
    /// `ConfigError::Io` if the file cannot be read, otherwise as `from_json`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Builds the program set the scripted executors share.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` if the main program is missing or an op is malformed.
    pub fn program_set(&self) -> Result<Rc<ProgramSet>, ConfigError> {
        if !self.programs.contains_key(&self.main) {
            return Err(ConfigError::Invalid(format!(
                "main program '{}' is not defined",
                self.main
            )));
        }
        let programs = self
            .programs
            .iter()
            .map(|(name, ops)| Program {
                name: name.clone(),
                ops: ops.clone(),
            })
            .collect();
        Ok(Rc::new(ProgramSet::new(programs)?))
    }

    /// Lays out memory and creates the main thread.
    ///
    /// Registers the static segments, records the TLS template, starts the heap
    /// past the static data and queues the main thread. A failure is fatal: it
    /// is reported with the segment layout and halts `sim`, as a failed tick does.
    ///
    /// # Errors
    ///
    /// Layout faults from the segment registry, or `ConfigError::Invalid` if the
    /// main program is missing.
    pub fn install(&self, sim: &mut Simulator, programs: &ProgramSet) -> Result<ThreadId, SimError> {
        match self.lay_out(sim, programs) {
            Ok(main) => Ok(main),
            Err(err) => {
                sim.halt(&err);
                Err(err)
            }
        }
    }

    fn lay_out(&self, sim: &mut Simulator, programs: &ProgramSet) -> Result<ThreadId, SimError> {
        let main = programs.index(&self.main).ok_or_else(|| {
            ConfigError::Invalid(format!("main program '{}' is not defined", self.main))
        })?;
        let memory = sim.memory_mut();
        for seg in &self.static_segments {
            let _ = match seg.align {
                Some(align) => memory.add_rounded_segment(seg.base, seg.size, align)?,
                None => memory.add_static_segment(seg.base, seg.size)?,
            };
        }
        if let Some(tls) = self.tls {
            memory.set_tls_info(tls.base, tls.size);
        }
        let heap = memory.init_heap_after_static()?;
        info!(
            segments = self.static_segments.len(),
            heap_start = format_args!("{:#x}", heap.start),
            main = %self.main,
            "workload installed"
        );
        sim.init_main_thread(entry_pc(main), self.argc, self.global_pointer)
    }
}
