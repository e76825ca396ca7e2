//! The middle end: the lir program representation and its analyses.

pub mod analysis;
pub mod lir;
