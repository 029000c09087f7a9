//! services/bridge/src/link/protocol.rs
//!
//! Defines the JSON envelope exchanged with the peer agent and the typed
//! payloads carried in its `data` field.

use neuro_surgery_core::{ActionInvocation, ActionSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;

//=========================================================================================
// Command Vocabulary
//=========================================================================================

/// Every command the protocol knows. `Action` is only ever received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandKind {
    #[serde(rename = "startup")]
    Startup,
    #[serde(rename = "context")]
    Context,
    #[serde(rename = "action/result")]
    ActionResult,
    #[serde(rename = "actions/register")]
    RegisterActions,
    #[serde(rename = "actions/unregister")]
    UnregisterActions,
    #[serde(rename = "actions/force")]
    ForceActions,
    #[serde(rename = "action")]
    Action,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Startup => "startup",
            CommandKind::Context => "context",
            CommandKind::ActionResult => "action/result",
            CommandKind::RegisterActions => "actions/register",
            CommandKind::UnregisterActions => "actions/unregister",
            CommandKind::ForceActions => "actions/force",
            CommandKind::Action => "action",
        }
    }

    pub fn from_wire(command: &str) -> Option<Self> {
        match command {
            "startup" => Some(CommandKind::Startup),
            "context" => Some(CommandKind::Context),
            "action/result" => Some(CommandKind::ActionResult),
            "actions/register" => Some(CommandKind::RegisterActions),
            "actions/unregister" => Some(CommandKind::UnregisterActions),
            "actions/force" => Some(CommandKind::ForceActions),
            "action" => Some(CommandKind::Action),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//=========================================================================================
// Envelopes
//=========================================================================================

/// An outbound message. `game` is attached by the session, never by callers.
#[derive(Serialize, Debug)]
pub struct Envelope<'a> {
    pub command: CommandKind,
    pub game: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a Value>,
}

/// The loose shape of anything the peer sends. The command stays a plain
/// string so unknown commands can be reported instead of failing to decode.
#[derive(Deserialize, Debug)]
struct RawInbound {
    command: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize, Debug, Default)]
struct RawAction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

//=========================================================================================
// Outbound Payloads
//=========================================================================================

#[derive(Serialize, Debug)]
pub struct ContextData<'a> {
    pub message: &'a str,
    pub silent: bool,
}

#[derive(Serialize, Debug)]
pub struct ActionResultData<'a> {
    pub id: &'a str,
    pub success: bool,
    pub message: &'a str,
}

#[derive(Serialize, Debug)]
pub struct WireAction<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub schema: &'a Value,
}

impl<'a> From<&'a ActionSpec> for WireAction<'a> {
    fn from(spec: &'a ActionSpec) -> Self {
        Self {
            name: &spec.name,
            description: &spec.description,
            schema: &spec.schema,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct RegisterData<'a> {
    pub actions: Vec<WireAction<'a>>,
}

#[derive(Serialize, Debug)]
pub struct UnregisterData<'a> {
    pub action_names: &'a [String],
}

#[derive(Serialize, Debug)]
pub struct ForceData<'a> {
    pub query: &'a str,
    pub action_names: &'a [String],
    pub ephemeral_context: bool,
    pub priority: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<&'a str>,
}

//=========================================================================================
// Inbound Decoding
//=========================================================================================

/// Why an inbound frame could not be turned into a message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("action message is missing the '{0}' field")]
    MissingField(&'static str),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Action(ActionInvocation),
    /// A well-formed envelope whose command this client does not handle.
    Unrecognized(String),
}

/// Decodes one text frame from the peer.
pub fn decode(text: &str) -> Result<Inbound, DecodeError> {
    let raw: RawInbound = serde_json::from_str(text)?;
    match CommandKind::from_wire(&raw.command) {
        Some(CommandKind::Action) => {
            let action: RawAction = match raw.data {
                Some(value) => serde_json::from_value(value)?,
                None => RawAction::default(),
            };
            let id = action.id.ok_or(DecodeError::MissingField("id"))?;
            let name = action.name.ok_or(DecodeError::MissingField("name"))?;
            Ok(Inbound::Action(ActionInvocation {
                id,
                name,
                params: normalize_params(action.data),
            }))
        }
        _ => Ok(Inbound::Unrecognized(raw.command)),
    }
}

/// Handlers always see a string: null or absent becomes empty, and a
/// structured payload is handed over re-encoded.
fn normalize_params(data: Option<Value>) -> String {
    match data {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn startup_envelope_has_no_data_field() {
        let envelope = Envelope {
            command: CommandKind::Startup,
            game: "Test Game",
            data: None,
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value, json!({"command": "startup", "game": "Test Game"}));
    }

    #[test]
    fn force_data_omits_absent_state() {
        let names = vec!["a".to_string()];
        let data = ForceData {
            query: "pick",
            action_names: &names,
            ephemeral_context: false,
            priority: "low",
            state: None,
        };
        let value = serde_json::to_value(&data).unwrap();
        assert!(value.get("state").is_none());
        assert_eq!(value["priority"], "low");
    }

    #[test]
    fn action_frames_decode_with_string_params() {
        let frame = r#"{"command":"action","data":{"id":"42","name":"move_to_drill_site","data":"{\"location\":\"bregma\"}"}}"#;
        let Inbound::Action(invocation) = decode(frame).unwrap() else {
            panic!("expected an action");
        };
        assert_eq!(invocation.id, "42");
        assert_eq!(invocation.name, "move_to_drill_site");
        assert_eq!(invocation.params, r#"{"location":"bregma"}"#);
    }

    #[test]
    fn null_or_missing_params_become_empty() {
        let with_null = r#"{"command":"action","data":{"id":"1","name":"inspect_hole","data":null}}"#;
        let without = r#"{"command":"action","data":{"id":"1","name":"inspect_hole"}}"#;
        for frame in [with_null, without] {
            match decode(frame).unwrap() {
                Inbound::Action(invocation) => assert_eq!(invocation.params, ""),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn missing_id_or_name_is_a_decode_error() {
        let frame = r#"{"command":"action","data":{"name":"inspect_hole"}}"#;
        assert!(matches!(decode(frame), Err(DecodeError::MissingField("id"))));
        let frame = r#"{"command":"action","data":{"id":"3"}}"#;
        assert!(matches!(decode(frame), Err(DecodeError::MissingField("name"))));
    }

    #[test]
    fn unknown_commands_are_reported_not_rejected() {
        let frame = r#"{"command":"actions/reregister_all"}"#;
        assert_eq!(
            decode(frame).unwrap(),
            Inbound::Unrecognized("actions/reregister_all".to_string())
        );
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        assert!(matches!(decode("{not json"), Err(DecodeError::Json(_))));
    }
}
