/// Scripted executor and program validation.
pub mod script;

/// Simulator run loop.
pub mod simulator;
