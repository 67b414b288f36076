//! Televault custody protocol
//!
//! This crate re-exports all the components of the Televault system.

pub use televault_core::*;
pub use televault_ledger::*;
pub use televault_storage::*;
