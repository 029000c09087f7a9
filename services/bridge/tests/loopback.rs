//! End-to-end tests against a local WebSocket server playing the peer.

mod common;

use bridge_lib::{
    adapters::InMemoryScene,
    config::Config,
    controller::{ControlCommand, Controller, ControllerHandle, NO_PROCEDURE_MESSAGE},
    link::{Connection, ConnectionState, LinkEventKind},
    procedure::ProcedureRegistry,
};
use common::{action_frame, GAME};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

type Peer = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> Peer {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    accept_async(stream).await.unwrap()
}

/// Next text frame from the bridge, decoded.
async fn next_json(peer: &mut Peer) -> Value {
    loop {
        let message = timeout(WAIT, peer.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send(peer: &mut Peer, frame: String) {
    peer.send(Message::Text(frame.into())).await.unwrap();
}

fn start(url: String, procedure: &str) -> (ControllerHandle, JoinHandle<()>) {
    let config = Config {
        ws_url: url,
        game_name: GAME.to_string(),
        procedure: procedure.to_string(),
        ..Config::default()
    };
    let (controller, handle) = Controller::new(
        config,
        ProcedureRegistry::builtin(),
        Box::new(InMemoryScene::new()),
    );
    (handle, tokio::spawn(controller.run()))
}

#[tokio::test]
async fn connecting_sends_startup_and_loads_the_configured_procedure() {
    let (listener, url) = listener().await;
    let (handle, task) = start(url, "ventriculostomy");
    let mut peer = accept(&listener).await;

    assert_eq!(next_json(&mut peer).await, json!({"command": "startup", "game": GAME}));

    let reply = handle.request(ControlCommand::AdvancePhase).await.unwrap();
    assert_eq!(reply, "Phase changed to cranial_access");
    assert_eq!(next_json(&mut peer).await["command"], "actions/register");
    assert_eq!(next_json(&mut peer).await["command"], "context");
    assert_eq!(next_json(&mut peer).await["command"], "actions/force");

    send(
        &mut peer,
        action_frame("17", "move_to_drill_site", Some(json!({"location": "foobar"}))),
    )
    .await;
    let result = next_json(&mut peer).await;
    assert_eq!(result["command"], "action/result");
    assert_eq!(result["game"], GAME);
    assert_eq!(result["data"]["id"], "17");
    assert_eq!(result["data"]["success"], false);

    // Garbage is dropped; the next valid action is still answered.
    send(&mut peer, "{not json".to_string()).await;
    send(&mut peer, action_frame("18", "inspect_hole", None)).await;
    let result = next_json(&mut peer).await;
    assert_eq!(result["data"]["id"], "18");
    assert_eq!(result["data"]["success"], true);

    let status = handle.request(ControlCommand::Status).await.unwrap();
    assert!(status.starts_with("Connection: Connected"));
    assert!(status.contains("Cranial Access"));

    assert_eq!(
        handle.request(ControlCommand::Shutdown).await.unwrap(),
        "Shutting down"
    );
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn actions_without_a_procedure_are_answered_with_a_failure() {
    let (listener, url) = listener().await;
    let (handle, task) = start(url, "appendectomy");
    let mut peer = accept(&listener).await;

    assert_eq!(next_json(&mut peer).await["command"], "startup");
    send(&mut peer, action_frame("1", "move_drill", None)).await;
    let result = next_json(&mut peer).await;
    assert_eq!(result["data"]["success"], false);
    assert_eq!(result["data"]["message"], NO_PROCEDURE_MESSAGE);

    assert_eq!(
        handle.request(ControlCommand::AdvancePhase).await.unwrap(),
        NO_PROCEDURE_MESSAGE
    );
    handle.request(ControlCommand::Shutdown).await.unwrap();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn reconnecting_registers_the_current_actions_again() {
    let (listener, url) = listener().await;
    let (handle, task) = start(url.clone(), "ventriculostomy");
    let mut peer = accept(&listener).await;
    next_json(&mut peer).await;
    handle.request(ControlCommand::AdvancePhase).await.unwrap();
    for _ in 0..3 {
        next_json(&mut peer).await;
    }

    handle.request(ControlCommand::Connect(None)).await.unwrap();
    let mut peer = accept(&listener).await;
    assert_eq!(next_json(&mut peer).await["command"], "startup");
    let register = next_json(&mut peer).await;
    assert_eq!(register["command"], "actions/register");
    assert_eq!(register["data"]["actions"].as_array().unwrap().len(), 5);

    handle.request(ControlCommand::Shutdown).await.unwrap();
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn load_requires_a_connection() {
    let config = Config {
        auto_connect: false,
        ..Config::default()
    };
    let (controller, handle) = Controller::new(
        config,
        ProcedureRegistry::builtin(),
        Box::new(InMemoryScene::new()),
    );
    let task = tokio::spawn(controller.run());

    let reply = handle
        .request(ControlCommand::Load("ventriculostomy".to_string()))
        .await
        .unwrap();
    assert!(reply.contains("not connected"));
    let listing = handle.request(ControlCommand::ListProcedures).await.unwrap();
    assert!(listing.starts_with("ventriculostomy - "));

    handle.request(ControlCommand::Shutdown).await.unwrap();
    timeout(WAIT, task).await.unwrap().unwrap();
}

//=========================================================================================
// Transport
//=========================================================================================

#[tokio::test]
async fn connection_reports_open_messages_and_close() {
    let (listener, url) = listener().await;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let connection = Connection::new(events_tx);
    connection.connect(&url);
    assert_eq!(connection.state(), ConnectionState::Connecting);

    let mut peer = accept(&listener).await;
    let open = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(open.kind, LinkEventKind::Open);
    assert_eq!(open.epoch, connection.epoch());
    assert_eq!(connection.state(), ConnectionState::Connected);

    send(&mut peer, "hello".to_string()).await;
    let message = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(message.kind, LinkEventKind::Message("hello".to_string()));

    peer.close(None).await.unwrap();
    let close = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(close.kind, LinkEventKind::Close { .. }));
    assert_eq!(connection.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn failed_handshake_is_an_error_state() {
    // Bind then drop so nothing is listening on the port.
    let (listener, url) = listener().await;
    drop(listener);

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let connection = Connection::new(events_tx);
    connection.connect(&url);

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(event.kind, LinkEventKind::Error(_)));
    assert!(matches!(connection.state(), ConnectionState::Error(_)));
}

#[tokio::test]
async fn reconnecting_supersedes_the_previous_attempt() {
    let (listener, url) = listener().await;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let connection = Connection::new(events_tx);

    connection.connect(&url);
    let _first = accept(&listener).await;
    let first_open = timeout(WAIT, events.recv()).await.unwrap().unwrap();

    connection.connect(&url);
    let _second = accept(&listener).await;
    assert!(connection.epoch() > first_open.epoch);

    // Whatever the first attempt reports late carries its old epoch.
    loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if event.kind == LinkEventKind::Open {
            assert_eq!(event.epoch, connection.epoch());
            break;
        }
        assert_eq!(event.epoch, first_open.epoch);
    }
}
