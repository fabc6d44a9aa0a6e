/// Reads, writes and page splitting through the memory façade.
pub mod access;

/// Memory construction from configuration.
pub mod builder;


/// Load-reserve, store-conditional, atomics and futures.
pub mod exclusive;
