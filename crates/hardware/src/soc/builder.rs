//! Memory subsystem construction.
//!
//! This module builds a node's `Memory` from configuration. It performs:
//! 1. **Backend selection:** Local, controller-forwarded or remote-forwarded, chosen once.
//! 2. **Controller timing:** Selects the simple or DRAM latency model for the controller backend.
//! 3. **Node layout:** Attaches the zone/precinct address layout for remote nodes.
//! 4. **Scratchpad:** Attaches the configured scratchpad, whatever the backend.

use tracing::info;

use crate::common::{ConfigError, SimError};
use crate::config::{BackendKind, Config};
use crate::soc::memory::Memory;
use crate::soc::memory::backend::{LocalBackend, MemoryBackend};
use crate::soc::memory::controller::{ControllerBackend, timing_model};
use crate::soc::memory::remote::{NodeLayout, RemoteBackend, RemoteLink};
use crate::soc::memory::scratchpad::Scratchpad;

/// Builds the memory subsystem described by `config`.
///
/// # Arguments
///
/// * `config` - Validated simulator configuration.
/// * `link` - Transport to the fabric; required by the remote backend, ignored otherwise.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` if the remote backend is selected without a
/// link, and `MemFault::BackingAlloc` if local memory or the scratchpad cannot
/// be allocated.
pub fn build_memory(config: &Config, link: Option<Box<dyn RemoteLink>>) -> Result<Memory, SimError> {
    let mem = &config.memory;
    let layout = NodeLayout::from_config(&config.node);
    let backend: Box<dyn MemoryBackend> = match mem.backend {
        BackendKind::Local => Box::new(LocalBackend::new(mem.mem_size)?),
        BackendKind::Controller => Box::new(ControllerBackend::new(
            mem.mem_size,
            timing_model(&mem.controller),
        )?),
        BackendKind::Remote => {
            let link = link.ok_or_else(|| {
                ConfigError::Invalid("memory.backend Remote needs a remote link".into())
            })?;
            Box::new(RemoteBackend::new(link, layout.local(), layout.local(), mem.mem_size))
        }
    };
    info!(backend = backend.name(), node = %layout.local(), "memory backend selected");
    let mut memory = Memory::new(mem, backend);
    if let Some(pad) = &mem.scratchpad {
        memory = memory.with_scratchpad(Scratchpad::new(pad)?);
    }
    Ok(match mem.backend {
        BackendKind::Remote => memory.with_layout(layout),
        BackendKind::Local | BackendKind::Controller => memory,
    })
}
