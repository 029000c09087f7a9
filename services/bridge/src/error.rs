//! services/bridge/src/error.rs
//!
//! Defines the primary error type for the bridge service.

use crate::config::ConfigError;
use crate::link::TransportError;
use crate::procedure::{LoadError, PhaseError};
use neuro_surgery_core::PortError;

/// The primary error type for the `bridge` service.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A procedure could not be loaded or swapped in.
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Phase error: {0}")]
    Phase(#[from] PhaseError),

    /// Represents an error that propagated up from the scene port.
    #[error("Scene Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents a standard Input/Output error (e.g., reading the operator console).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The controller task has exited and can no longer take requests.
    #[error("The controller has stopped")]
    ControllerStopped,

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
