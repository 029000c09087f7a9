//! Shared fixtures for the bridge integration tests.

#![allow(dead_code)]

use bridge_lib::link::{Link, ProtocolSession, TransportError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const GAME: &str = "Test Game";

/// A link that records every frame instead of sending it.
#[derive(Default)]
pub struct RecordingLink {
    connected: AtomicBool,
    frames: Mutex<Vec<String>>,
}

impl RecordingLink {
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Drains the recorded frames, decoded.
    pub fn take(&self) -> Vec<Value> {
        self.frames
            .lock()
            .drain(..)
            .map(|frame| serde_json::from_str(&frame).unwrap())
            .collect()
    }
}

impl Link for RecordingLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.frames.lock().push(text);
        Ok(())
    }
}

pub fn connected_session() -> (ProtocolSession, Arc<RecordingLink>) {
    let link = Arc::new(RecordingLink::default());
    link.set_connected(true);
    (ProtocolSession::new(link.clone(), GAME), link)
}

/// The wire form of an `action` message from the peer.
pub fn action_frame(id: &str, name: &str, params: Option<Value>) -> String {
    let mut data = json!({"id": id, "name": name});
    if let Some(params) = params {
        data["data"] = Value::String(params.to_string());
    }
    json!({"command": "action", "data": data}).to_string()
}

pub fn commands(frames: &[Value]) -> Vec<&str> {
    frames
        .iter()
        .map(|frame| frame["command"].as_str().unwrap())
        .collect()
}
