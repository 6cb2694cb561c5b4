//! Client-side construction, sponsorship and submission of ERC-4337 user
//! operations for ERC-7579 modular accounts (EntryPoint v0.8).

pub mod account;
pub mod batch;
pub mod builder;
pub mod config;
pub mod contracts;
pub mod encoding;
pub mod error;
pub mod funding;
pub mod nonce;
pub mod packing;
pub mod retry;
pub mod signer;
pub mod sponsor;
pub mod submit;
pub mod types;
pub mod vault;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
