//! services/bridge/src/procedure/machine.rs
//!
//! The phase/action state machine for one loaded procedure.
//!
//! The machine is the only owner of the current phase, the set of actions
//! registered with the peer and the in-flight operation. It talks to the peer
//! exclusively through the `ProtocolSession` handed into each call.

use crate::link::ProtocolSession;
use crate::procedure::operation::Operation;
use neuro_surgery_core::{
    ActionInvocation, ActionResult, ActionSet, ActionSpec, OperationOutcome, Phase, PhaseEntry,
    PortError, Procedure, Scene,
};
use std::collections::HashSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Returned for every invocation that arrives while an operation is running.
pub const BUSY_MESSAGE: &str =
    "I'm still moving, wait for the current movement to finish before giving another instruction";

//=========================================================================================
// Errors and Reports
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("Invalid phase: {0}")]
    UnknownPhase(String),
    #[error("Cannot change phase while an operation is in progress")]
    Busy,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Unknown procedure: {0}")]
    UnknownProcedure(String),
    #[error("Cannot load a procedure while not connected")]
    NotConnected,
    #[error("Procedure '{0}' defines no phases")]
    NoPhases(String),
    #[error("Phase '{0}' is defined twice")]
    DuplicatePhase(String),
    #[error("Phase '{phase}' lists action '{action}' without a spec")]
    MissingActionSpec { phase: String, action: String },
    #[error("Scene setup failed: {0}")]
    Scene(#[from] PortError),
}

/// What `advance_phase` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Entered(String),
    AlreadyAtFinalPhase,
}

//=========================================================================================
// The Machine
//=========================================================================================

pub struct ProcedureMachine {
    procedure: Box<dyn Procedure>,
    phases: Vec<Phase>,
    current: usize,
    registered: ActionSet,
    operation: Option<Operation>,
}

impl ProcedureMachine {
    /// Validates `procedure`, prepares the scene and enters the first phase.
    pub fn load(
        mut procedure: Box<dyn Procedure>,
        session: &ProtocolSession,
        scene: &mut dyn Scene,
    ) -> Result<Self, LoadError> {
        let phases = procedure.phases();
        if phases.is_empty() {
            return Err(LoadError::NoPhases(procedure.name().to_string()));
        }

        let mut seen = HashSet::new();
        for phase in &phases {
            if !seen.insert(phase.key.as_str()) {
                return Err(LoadError::DuplicatePhase(phase.key.clone()));
            }
            if let Some(action) = phase
                .action_names
                .iter()
                .find(|name| procedure.action_spec(name).is_none())
            {
                return Err(LoadError::MissingActionSpec {
                    phase: phase.key.clone(),
                    action: action.clone(),
                });
            }
        }

        scene.clear();
        procedure.on_load(scene)?;
        info!("Loaded procedure: {}", procedure.name());

        let mut machine = Self {
            procedure,
            phases,
            current: 0,
            registered: ActionSet::new(),
            operation: None,
        };
        machine.enter_current(session, scene);
        Ok(machine)
    }

    pub fn procedure_name(&self) -> &str {
        self.procedure.name()
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn current_phase(&self) -> &Phase {
        &self.phases[self.current]
    }

    pub fn registered(&self) -> &ActionSet {
        &self.registered
    }

    pub fn is_moving(&self) -> bool {
        self.operation.is_some()
    }

    pub fn operation(&self) -> Option<&Operation> {
        self.operation.as_ref()
    }

    /// Text lines for the operator panel.
    pub fn panel(&self, scene: &dyn Scene) -> Vec<String> {
        self.procedure.panel(self.current_phase(), scene)
    }

    //=====================================================================================
    // Phase Transitions
    //=====================================================================================

    /// Moves to the phase after the current one. At the last phase this does
    /// nothing and says so.
    pub fn advance_phase(
        &mut self,
        session: &ProtocolSession,
        scene: &mut dyn Scene,
    ) -> Result<Advance, PhaseError> {
        let Some(next) = self.phases.get(self.current + 1) else {
            info!("Already at the last phase");
            return Ok(Advance::AlreadyAtFinalPhase);
        };
        let key = next.key.clone();
        self.set_phase(&key, session, scene)?;
        Ok(Advance::Entered(key))
    }

    /// Switches to `key`. Either the whole transition happens or nothing does.
    pub fn set_phase(
        &mut self,
        key: &str,
        session: &ProtocolSession,
        scene: &mut dyn Scene,
    ) -> Result<(), PhaseError> {
        let Some(index) = self.phases.iter().position(|p| p.key == key) else {
            warn!("Invalid phase: {}", key);
            return Err(PhaseError::UnknownPhase(key.to_string()));
        };
        if self.is_moving() {
            return Err(PhaseError::Busy);
        }

        let outgoing = self.current;
        self.procedure.on_phase_exit(&self.phases[outgoing], scene);
        let names = self.registered.names();
        session.unregister_actions(&names);
        self.registered.unregister(&names);
        info!(
            "Unregistered {} actions for {}",
            names.len(),
            self.phases[outgoing].key
        );

        self.current = index;
        self.enter_current(session, scene);
        Ok(())
    }

    /// Goes back to the first phase.
    pub fn reset(&mut self, session: &ProtocolSession, scene: &mut dyn Scene) -> Result<(), PhaseError> {
        let first = self.phases[0].key.clone();
        self.set_phase(&first, session, scene)
    }

    fn enter_current(&mut self, session: &ProtocolSession, scene: &mut dyn Scene) {
        let phase = self.phases[self.current].clone();
        info!(
            "Phase changed to: {} - {}",
            phase.display_name, phase.description
        );

        let specs = self.specs_for(&phase);
        session.register_actions(&specs);
        self.registered.register(specs);

        let PhaseEntry { context, force } = self.procedure.on_phase_enter(&phase, scene);
        if let Some(message) = context {
            session.send_context(&message, false);
        }
        if let Some(force) = force {
            if phase.action_names.is_empty() {
                warn!("Phase {} has no actions to force", phase.key);
            } else {
                session.force_actions(
                    &force.query,
                    &phase.action_names,
                    force.state.as_deref(),
                    force.ephemeral_context,
                    force.priority,
                );
            }
        }
    }

    fn specs_for(&self, phase: &Phase) -> Vec<ActionSpec> {
        phase
            .action_names
            .iter()
            .filter_map(|name| self.procedure.action_spec(name))
            .collect()
    }

    /// Registers the active phase's actions again, for a fresh peer connection.
    pub fn reregister(&self, session: &ProtocolSession) {
        debug!("Re-registering {} actions", self.registered.len());
        session.register_actions(&self.registered.specs());
    }

    //=====================================================================================
    // Dispatch
    //=====================================================================================

    /// Runs one invocation and sends exactly one result for it.
    pub fn dispatch(
        &mut self,
        invocation: &ActionInvocation,
        session: &ProtocolSession,
        scene: &mut dyn Scene,
        now: Instant,
    ) -> ActionResult {
        let (success, message) = self.evaluate(invocation, scene, now);
        session.send_action_result(&invocation.id, success, &message);
        ActionResult {
            id: invocation.id.clone(),
            success,
            message,
        }
    }

    fn evaluate(
        &mut self,
        invocation: &ActionInvocation,
        scene: &mut dyn Scene,
        now: Instant,
    ) -> (bool, String) {
        if self.is_moving() {
            debug!("Rejecting {} while moving", invocation.name);
            return (false, BUSY_MESSAGE.to_string());
        }

        let phase = &self.phases[self.current];
        if !phase.allows(&invocation.name) {
            warn!("Unknown action: {} in phase {}", invocation.name, phase.key);
            return (
                false,
                format!(
                    "Unknown action '{}' in phase {}",
                    invocation.name, phase.display_name
                ),
            );
        }

        let outcome = self.procedure.on_action(phase, invocation, scene);
        let Some(request) = outcome.operation.filter(|_| outcome.success) else {
            return (outcome.success, outcome.message);
        };

        let start = match scene.pose(&request.tool) {
            Ok(pose) => pose,
            Err(e) => {
                error!("Cannot start operation: {}", e);
                return (false, format!("I can't find the {} to move it", request.tool));
            }
        };
        match Operation::start(request, start, now) {
            Ok(operation) => {
                info!(
                    "Operation started: {:?} of {} over {:.1}",
                    operation.request().kind,
                    operation.tool(),
                    operation.total_distance()
                );
                self.operation = Some(operation);
                (true, outcome.message)
            }
            Err(e) => {
                error!("Cannot start operation: {}", e);
                (false, "That movement can't be carried out".to_string())
            }
        }
    }

    //=====================================================================================
    // Operation Lifecycle
    //=====================================================================================

    /// Advances the running operation to `now`. Returns the outcome when it ends.
    pub fn tick(
        &mut self,
        now: Instant,
        session: &ProtocolSession,
        scene: &mut dyn Scene,
    ) -> Option<OperationOutcome> {
        let progress = {
            let operation = self.operation.as_ref()?;
            let progress = operation.sample(now);
            scene.set_pose(operation.tool(), progress.pose);
            progress
        };
        if !progress.finished {
            return None;
        }
        self.finish(OperationOutcome::Completed, session, scene);
        Some(OperationOutcome::Completed)
    }

    /// Stops the running operation where it is. Returns false if nothing was running.
    pub fn cancel_operation(&mut self, session: &ProtocolSession, scene: &mut dyn Scene) -> bool {
        if !self.is_moving() {
            return false;
        }
        self.finish(OperationOutcome::Cancelled, session, scene);
        true
    }

    fn finish(&mut self, outcome: OperationOutcome, session: &ProtocolSession, scene: &mut dyn Scene) {
        let Some(operation) = self.operation.take() else {
            return;
        };
        info!("Operation on {} ended: {:?}", operation.tool(), outcome);

        let completion = self
            .procedure
            .on_operation_finished(operation.request(), outcome, scene);
        if let Some(message) = completion.context {
            session.send_context(&message, false);
        }
        if completion.advance_phase {
            if let Err(e) = self.advance_phase(session, scene) {
                error!("Failed to advance phase after operation: {}", e);
            }
        }
    }

    /// Tears the machine down: stops any movement and withdraws its actions.
    pub fn unload(mut self, session: &ProtocolSession, scene: &mut dyn Scene) {
        if let Some(operation) = self.operation.take() {
            info!("Dropping operation on {} during unload", operation.tool());
        }
        let names = self.registered.names();
        session.unregister_actions(&names);
        self.registered.clear();
        self.procedure.cleanup(scene);
        info!("Unloaded procedure: {}", self.procedure.name());
    }
}
