//! services/bridge/src/lib.rs
//!
//! Library half of the bridge service. The binary in `bin/bridge.rs` wires
//! these modules together; integration tests drive them directly.

pub mod adapters;
pub mod config;
pub mod console;
pub mod controller;
pub mod error;
pub mod link;
pub mod procedure;
pub mod procedures;
