//! services/bridge/src/procedures/mod.rs
//!
//! Concrete surgical procedures. Each one implements the `Procedure` port and
//! is registered by name in `ProcedureRegistry::builtin`.

pub mod ventriculostomy;

pub use ventriculostomy::Ventriculostomy;
