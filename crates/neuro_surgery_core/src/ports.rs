//! crates/neuro_surgery_core/src/ports.rs
//!
//! Defines the contracts (traits) between the protocol core and its collaborators.
//! A `Procedure` supplies phases, action schemas and handlers; a `Scene` is the
//! opaque simulation state those handlers read and write. The `bridge` service
//! drives both without knowing any concrete procedure.

use crate::domain::{
    ActionInvocation, ActionOutcome, ActionSpec, Completion, OperationOutcome, OperationRequest,
    Phase, PhaseEntry,
};
use crate::geometry::{Pose, Vec3};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Scene Port
//=========================================================================================

/// The simulation state a procedure manipulates. Rendering lives behind this.
pub trait Scene: Send {
    /// Current pose of a named tool.
    fn pose(&self, tool: &str) -> PortResult<Pose>;

    fn set_pose(&mut self, tool: &str, pose: Pose);

    /// Position of a named anatomical landmark, if the scene has one.
    fn landmark(&self, name: &str) -> Option<Vec3>;

    fn set_landmark(&mut self, name: &str, position: Vec3);

    /// Adds a spherical anatomical region used by collision checks.
    fn add_region(&mut self, name: &str, center: Vec3, radius: f64);

    /// Names of the regions containing the tip of `tool`.
    fn collisions(&self, tool: &str) -> PortResult<Vec<String>>;

    /// Drops every tool, landmark and region.
    fn clear(&mut self);
}

//=========================================================================================
// Procedure Port
//=========================================================================================

/// A staged procedure driven over the action protocol.
///
/// Phases are returned in order; the first one is entered on load. Every action
/// name a phase lists must have a spec from [`Procedure::action_spec`].
pub trait Procedure: Send {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn phases(&self) -> Vec<Phase>;

    fn action_spec(&self, action_name: &str) -> Option<ActionSpec>;

    /// Prepares the scene (tools, landmarks, regions) for this procedure.
    fn on_load(&mut self, scene: &mut dyn Scene) -> PortResult<()>;

    /// Text lines describing the procedure state for an operator panel.
    fn panel(&self, phase: &Phase, scene: &dyn Scene) -> Vec<String>;

    fn on_phase_exit(&mut self, _phase: &Phase, _scene: &mut dyn Scene) {}

    fn on_phase_enter(&mut self, _phase: &Phase, _scene: &mut dyn Scene) -> PhaseEntry {
        PhaseEntry::default()
    }

    /// Handles one invocation that is allowed in `phase`.
    ///
    /// Parameters are parsed here; malformed input must come back as a failed
    /// outcome with a readable message.
    fn on_action(
        &mut self,
        phase: &Phase,
        invocation: &ActionInvocation,
        scene: &mut dyn Scene,
    ) -> ActionOutcome;

    /// Called once an operation this procedure requested has ended.
    fn on_operation_finished(
        &mut self,
        request: &OperationRequest,
        outcome: OperationOutcome,
        scene: &mut dyn Scene,
    ) -> Completion;

    fn cleanup(&mut self, _scene: &mut dyn Scene) {}
}
