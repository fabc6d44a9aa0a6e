//! Mock implementations of the crate's external seams.

/// Mocked transport for the remote-forwarded backend.
pub mod link;
