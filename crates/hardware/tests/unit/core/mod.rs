/// Fault injector.
pub mod fault;


/// Thread table and lifecycle.
pub mod thread_table;

/// Translator and exclusive-access primitives.
pub mod units;
