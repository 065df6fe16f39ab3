//! Shared test utilities for InferaDB Ledger topology crates.
//!
//! - [`assert_eventually`] - Poll a condition until it's true or timeout
//! - [`strategies`] - Proptest generators for nodes, snapshots, seeds and ranked addresses

#![deny(unsafe_code)]

mod assertions;
pub use assertions::assert_eventually;

pub mod strategies;
