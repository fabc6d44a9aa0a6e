/// Atomic ALU, reservation table and future set.
pub mod lsu;
