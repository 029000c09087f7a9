//! services/bridge/src/link/session.rs
//!
//! The protocol session: turns typed calls into envelopes for the peer and
//! inbound frames into action invocations.
//!
//! Outbound calls never fail from the caller's point of view. When the link is
//! down the call logs a diagnostic and does nothing; messages are not queued or
//! retried.

use crate::link::protocol::{
    self, ActionResultData, CommandKind, ContextData, DecodeError, Envelope, ForceData, Inbound,
    RegisterData, UnregisterData, WireAction,
};
use crate::link::transport::Link;
use chrono::{DateTime, Local};
use neuro_surgery_core::{ActionInvocation, ActionSpec, Priority};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the sent-message audit channel. Slow subscribers lag, they
/// never block the session.
const AUDIT_CAPACITY: usize = 256;

/// One outbound message as it was handed to the transport.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub command: CommandKind,
    pub data: Option<Value>,
    pub sent_at: DateTime<Local>,
}

pub struct ProtocolSession {
    link: Arc<dyn Link>,
    game: String,
    sent: broadcast::Sender<SentMessage>,
}

impl ProtocolSession {
    pub fn new(link: Arc<dyn Link>, game: impl Into<String>) -> Self {
        let (sent, _) = broadcast::channel(AUDIT_CAPACITY);
        Self {
            link,
            game: game.into(),
            sent,
        }
    }

    pub fn game(&self) -> &str {
        &self.game
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Subscribes to the audit stream of every message sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SentMessage> {
        self.sent.subscribe()
    }

    //=====================================================================================
    // Outbound Commands
    //=====================================================================================

    /// Announces this client to the peer. Carries no `data` field.
    pub fn send_startup(&self) {
        self.send(CommandKind::Startup, None);
    }

    pub fn send_context(&self, message: &str, silent: bool) {
        self.send_payload(CommandKind::Context, &ContextData { message, silent });
    }

    pub fn send_action_result(&self, id: &str, success: bool, message: &str) {
        self.send_payload(
            CommandKind::ActionResult,
            &ActionResultData {
                id,
                success,
                message,
            },
        );
    }

    pub fn register_actions(&self, actions: &[ActionSpec]) {
        if actions.is_empty() {
            debug!("No actions to register");
            return;
        }
        let data = RegisterData {
            actions: actions.iter().map(WireAction::from).collect(),
        };
        self.send_payload(CommandKind::RegisterActions, &data);
    }

    pub fn unregister_actions(&self, names: &[String]) {
        if names.is_empty() {
            debug!("No actions to unregister");
            return;
        }
        self.send_payload(
            CommandKind::UnregisterActions,
            &UnregisterData {
                action_names: names,
            },
        );
    }

    pub fn force_actions(
        &self,
        query: &str,
        action_names: &[String],
        state: Option<&str>,
        ephemeral_context: bool,
        priority: Priority,
    ) {
        self.send_payload(
            CommandKind::ForceActions,
            &ForceData {
                query,
                action_names,
                ephemeral_context,
                priority: priority.as_str(),
                state,
            },
        );
    }

    fn send_payload<T: Serialize>(&self, command: CommandKind, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(data) => self.send(command, Some(data)),
            Err(e) => warn!("Failed to encode {} payload: {}", command, e),
        }
    }

    fn send(&self, command: CommandKind, data: Option<Value>) {
        if !self.link.is_connected() {
            warn!("Cannot send {}: not connected", command);
            return;
        }

        let envelope = Envelope {
            command,
            game: &self.game,
            data: data.as_ref(),
        };
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {} envelope: {}", command, e);
                return;
            }
        };

        match self.link.send_text(text) {
            Ok(()) => debug!("Sent message: {}", command),
            Err(e) => warn!("Failed to send {}: {}", command, e),
        }

        // Nobody listening is fine.
        let _ = self.sent.send(SentMessage {
            command,
            data,
            sent_at: Local::now(),
        });
    }

    //=====================================================================================
    // Inbound Frames
    //=====================================================================================

    /// Decodes one raw frame. Returns the invocation for well-formed `action`
    /// messages; everything else is logged and dropped.
    pub fn handle_frame(&self, text: &str) -> Option<ActionInvocation> {
        debug!(target: "audit", "Received: {}", text);
        match protocol::decode(text) {
            Ok(Inbound::Action(invocation)) => {
                info!(
                    "Action received: {} (id: {})",
                    invocation.name, invocation.id
                );
                Some(invocation)
            }
            Ok(Inbound::Unrecognized(command)) => {
                warn!("Unknown command: {}", command);
                None
            }
            Err(DecodeError::MissingField(field)) => {
                warn!("Dropping action message without '{}'", field);
                None
            }
            Err(e) => {
                warn!("Failed to parse WebSocket message: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::transport::TransportError;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FakeLink {
        connected: AtomicBool,
        frames: Mutex<Vec<String>>,
    }

    impl Link for FakeLink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn send_text(&self, text: String) -> Result<(), TransportError> {
            self.frames.lock().push(text);
            Ok(())
        }
    }

    fn session(connected: bool) -> (ProtocolSession, Arc<FakeLink>) {
        let link = Arc::new(FakeLink::default());
        link.connected.store(connected, Ordering::SeqCst);
        (ProtocolSession::new(link.clone(), "Test Game"), link)
    }

    fn frames(link: &FakeLink) -> Vec<Value> {
        link.frames
            .lock()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    #[test]
    fn every_envelope_carries_the_game_name() {
        let (session, link) = session(true);
        session.send_startup();
        session.send_context("hello", true);
        session.send_action_result("7", false, "nope");

        let sent = frames(&link);
        assert_eq!(sent[0], json!({"command": "startup", "game": "Test Game"}));
        assert_eq!(
            sent[1],
            json!({"command": "context", "game": "Test Game", "data": {"message": "hello", "silent": true}})
        );
        assert_eq!(
            sent[2]["data"],
            json!({"id": "7", "success": false, "message": "nope"})
        );
    }

    #[test]
    fn register_and_unregister_use_the_wire_field_names() {
        let (session, link) = session(true);
        session.register_actions(&[ActionSpec::new(
            "inspect_hole",
            "Look at the hole",
            json!({"type": "object"}),
        )]);
        session.unregister_actions(&["inspect_hole".to_string()]);

        let sent = frames(&link);
        assert_eq!(sent[0]["command"], "actions/register");
        assert_eq!(sent[0]["data"]["actions"][0]["name"], "inspect_hole");
        assert_eq!(sent[1]["command"], "actions/unregister");
        assert_eq!(sent[1]["data"]["action_names"], json!(["inspect_hole"]));
    }

    #[test]
    fn force_actions_defaults() {
        let (session, link) = session(true);
        session.force_actions("Pick one", &["a".to_string()], None, false, Priority::default());
        let sent = frames(&link);
        assert_eq!(
            sent[0]["data"],
            json!({"query": "Pick one", "action_names": ["a"], "ephemeral_context": false, "priority": "low"})
        );
    }

    #[test]
    fn sends_while_disconnected_are_dropped_without_audit() {
        let (session, link) = session(false);
        let mut audit = session.subscribe();
        session.send_context("lost", false);
        assert!(link.frames.lock().is_empty());
        assert!(audit.try_recv().is_err());
    }

    #[test]
    fn sent_messages_are_audited() {
        let (session, _link) = session(true);
        let mut audit = session.subscribe();
        session.send_context("seen", false);
        let record = audit.try_recv().unwrap();
        assert_eq!(record.command, CommandKind::Context);
        assert_eq!(record.data.unwrap()["message"], "seen");
    }

    #[test]
    fn malformed_frames_yield_nothing() {
        let (session, link) = session(true);
        assert!(session.handle_frame("not json at all").is_none());
        assert!(session.handle_frame(r#"{"command":"action","data":{}}"#).is_none());
        assert!(session.handle_frame(r#"{"command":"shutdown"}"#).is_none());
        assert!(link.frames.lock().is_empty());
    }
}
