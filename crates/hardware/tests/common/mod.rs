//! Shared helpers for the unit tests.


/// Mock implementations of external seams.
pub mod mocks;
