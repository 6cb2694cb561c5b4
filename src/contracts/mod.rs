//! Per-role capability traits for the on-chain collaborators, each with an
//! ethers-backed implementation.

mod chain;
mod entry_point;
mod factory;
mod sponsor;

pub use chain::*;
pub use entry_point::*;
pub use factory::*;
pub use sponsor::*;
