pub mod domain;
pub mod geometry;
pub mod ports;

pub use domain::{
    ActionInvocation, ActionOutcome, ActionResult, ActionSet, ActionSpec, Completion, ForceRequest,
    MovementKind, OperationOutcome, OperationRequest, Phase, PhaseEntry, Priority,
};
pub use geometry::{Pose, Quat, Vec3};
pub use ports::{PortError, PortResult, Procedure, Scene};
