//! crates/neuro_surgery_core/src/domain.rs
//!
//! Defines the pure, core data structures of the action protocol.
//! These structs are independent of the wire format; the `bridge` service
//! translates them to and from JSON envelopes.

use crate::geometry::Pose;
use indexmap::IndexMap;
use serde_json::Value;

//=========================================================================================
// Actions
//=========================================================================================

/// A command the peer may invoke, described by a JSON-Schema-like object.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
        }
    }
}

/// An inbound request to run an action.
///
/// `params` is the raw JSON string sent by the peer. A missing or null
/// payload arrives here as an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionInvocation {
    pub id: String,
    pub name: String,
    pub params: String,
}

/// The answer sent back for exactly one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub id: String,
    pub success: bool,
    pub message: String,
}

/// The set of actions currently registered with the peer, keyed by name.
///
/// Registering a present name replaces its spec; unregistering an absent
/// name does nothing. Iteration follows registration order.
#[derive(Debug, Clone, Default)]
pub struct ActionSet {
    actions: IndexMap<String, ActionSpec>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, specs: impl IntoIterator<Item = ActionSpec>) {
        for spec in specs {
            self.actions.insert(spec.name.clone(), spec);
        }
    }

    pub fn unregister<S: AsRef<str>>(&mut self, names: impl IntoIterator<Item = S>) {
        for name in names {
            self.actions.shift_remove(name.as_ref());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    pub fn specs(&self) -> Vec<ActionSpec> {
        self.actions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
    }
}

//=========================================================================================
// Phases
//=========================================================================================

/// One stage of a procedure with its fixed set of action names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub key: String,
    pub display_name: String,
    pub description: String,
    pub action_names: Vec<String>,
}

impl Phase {
    pub fn new(key: &str, display_name: &str, description: &str, action_names: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            action_names: action_names.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn allows(&self, action_name: &str) -> bool {
        self.action_names.iter().any(|n| n == action_name)
    }
}

/// How urgently the peer should act on a forced action request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

/// Asks the peer to pick one of the active phase's actions right away.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceRequest {
    pub query: String,
    pub state: Option<String>,
    pub ephemeral_context: bool,
    pub priority: Priority,
}

impl ForceRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            state: None,
            ephemeral_context: false,
            priority: Priority::Low,
        }
    }
}

/// What a procedure wants to happen when a phase becomes active.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseEntry {
    pub context: Option<String>,
    pub force: Option<ForceRequest>,
}

//=========================================================================================
// Handler Outcomes and Operations
//=========================================================================================

/// The kind of continuous motion an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementKind {
    /// Straight-line travel of the tool tip.
    Translate,
    /// Orientation change about the tool tip.
    Rotate,
    /// Catheter advance along its axis.
    Insert,
    /// Drill advance along its axis.
    Drill,
}

impl MovementKind {
    /// Rotations measure progress in degrees, everything else in millimeters.
    pub fn is_angular(&self) -> bool {
        matches!(self, MovementKind::Rotate)
    }
}

/// A request from an action handler to start a long-running operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub tool: String,
    pub kind: MovementKind,
    pub target: Pose,
    /// Millimeters per second, or degrees per second for rotations.
    pub speed: f64,
}

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    Completed,
    Cancelled,
}

/// The `(success, message)` answer of an action handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    pub operation: Option<OperationRequest>,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            operation: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            operation: None,
        }
    }

    /// A successful answer whose real effect is reported once the operation ends.
    pub fn started(message: impl Into<String>, operation: OperationRequest) -> Self {
        Self {
            success: true,
            message: message.into(),
            operation: Some(operation),
        }
    }
}

/// Follow-up returned by a procedure once an operation has ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub context: Option<String>,
    pub advance_phase: bool,
}

impl Completion {
    pub fn narrate(message: impl Into<String>) -> Self {
        Self {
            context: Some(message.into()),
            advance_phase: false,
        }
    }
}
