//! services/bridge/src/link/transport.rs
//!
//! Owns the single WebSocket connection to the peer agent.
//!
//! Each `connect` spawns a background task that owns the socket for the
//! lifetime of that attempt. Lifecycle events and inbound text frames are pushed
//! into one `mpsc` queue tagged with the attempt's epoch, so the consumer can
//! discard anything a torn-down socket reports late.

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

//=========================================================================================
// Public Types
//=========================================================================================

/// Connection lifecycle as seen by the rest of the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("Disconnected"),
            ConnectionState::Connecting => f.write_str("Connecting..."),
            ConnectionState::Connected => f.write_str("Connected"),
            ConnectionState::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Something that happened on a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    Open,
    Close { code: Option<u16>, reason: String },
    Error(String),
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    /// The connection attempt this event belongs to.
    pub epoch: u64,
    pub kind: LinkEventKind,
}

/// Transport-level failures. These are logged, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("the connection task has stopped")]
    Closed,
}

/// The outbound half of a connection, as needed by the protocol session.
pub trait Link: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Queues one text frame. Delivery is best effort.
    fn send_text(&self, text: String) -> Result<(), TransportError>;
}

//=========================================================================================
// Connection
//=========================================================================================

struct Status {
    epoch: u64,
    state: ConnectionState,
}

/// Shared between the owner and the background task.
struct Shared {
    status: RwLock<Status>,
}

impl Shared {
    /// Updates the state only if `epoch` is still the current attempt.
    fn set_state(&self, epoch: u64, state: ConnectionState) {
        let mut status = self.status.write();
        if status.epoch == epoch {
            status.state = state;
        }
    }
}

#[derive(Default)]
struct Attempt {
    outbound: Option<mpsc::UnboundedSender<String>>,
    cancel: Option<CancellationToken>,
}

pub struct Connection {
    shared: Arc<Shared>,
    attempt: Mutex<Attempt>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl Connection {
    /// Creates a disconnected connection that reports into `events`.
    pub fn new(events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                status: RwLock::new(Status {
                    epoch: 0,
                    state: ConnectionState::Disconnected,
                }),
            }),
            attempt: Mutex::new(Attempt::default()),
            events,
        }
    }

    /// Starts an asynchronous connection attempt and returns immediately.
    ///
    /// Any existing connection is torn down first. Must be called from within a
    /// tokio runtime.
    pub fn connect(&self, url: &str) {
        let mut attempt = self.attempt.lock();
        if let Some(cancel) = attempt.cancel.take() {
            cancel.cancel();
        }

        let epoch = {
            let mut status = self.shared.status.write();
            status.epoch += 1;
            status.state = ConnectionState::Connecting;
            status.epoch
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        attempt.outbound = Some(outbound_tx);
        attempt.cancel = Some(cancel.clone());

        info!("Connecting to {} (attempt {})", url, epoch);
        tokio::spawn(run_connection(
            url.to_string(),
            epoch,
            outbound_rx,
            cancel,
            self.events.clone(),
            self.shared.clone(),
        ));
    }

    /// Requests termination of the open connection. Safe to call in any state.
    pub fn disconnect(&self) {
        let mut attempt = self.attempt.lock();
        attempt.outbound = None;
        match attempt.cancel.take() {
            Some(cancel) => {
                info!("Disconnecting");
                cancel.cancel();
                let epoch = self.shared.status.read().epoch;
                self.shared.set_state(epoch, ConnectionState::Disconnected);
            }
            None => debug!("Disconnect requested with no open connection"),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.read().state.clone()
    }

    /// The epoch of the most recent connection attempt.
    pub fn epoch(&self) -> u64 {
        self.shared.status.read().epoch
    }
}

impl Link for Connection {
    fn is_connected(&self) -> bool {
        self.shared.status.read().state == ConnectionState::Connected
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let attempt = self.attempt.lock();
        match &attempt.outbound {
            Some(tx) => tx.send(text).map_err(|_| TransportError::Closed),
            None => Err(TransportError::NotConnected),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(cancel) = self.attempt.get_mut().cancel.take() {
            cancel.cancel();
        }
    }
}

//=========================================================================================
// Background Task
//=========================================================================================

/// Runs one connection attempt from handshake to close.
async fn run_connection(
    url: String,
    epoch: u64,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<LinkEvent>,
    shared: Arc<Shared>,
) {
    let emit = |kind: LinkEventKind| {
        // The receiver only goes away when the bridge is shutting down.
        let _ = events.send(LinkEvent { epoch, kind });
    };

    let handshake = tokio::select! {
        _ = cancel.cancelled() => {
            info!("Connection attempt {} cancelled before the handshake finished", epoch);
            emit(LinkEventKind::Close { code: None, reason: "connect cancelled".to_string() });
            return;
        }
        result = connect_async(url.as_str()) => result,
    };

    let ws_stream = match handshake {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            error!("Connection to {} failed: {}", url, e);
            shared.set_state(epoch, ConnectionState::Error(e.to_string()));
            emit(LinkEventKind::Error(e.to_string()));
            return;
        }
    };

    let (mut sink, mut stream) = ws_stream.split();

    if cancel.is_cancelled() {
        let _ = sink.send(Message::Close(None)).await;
        emit(LinkEventKind::Close { code: Some(1000), reason: "client disconnect".to_string() });
        return;
    }

    info!("Connected to {}", url);
    shared.set_state(epoch, ConnectionState::Connected);
    emit(LinkEventKind::Open);

    let (code, reason) = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break (Some(1000), "client disconnect".to_string());
            }
            outgoing = outbound_rx.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!("Failed to write frame: {}", e);
                        emit(LinkEventKind::Error(e.to_string()));
                        break (None, e.to_string());
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break (Some(1000), "client disconnect".to_string());
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => emit(LinkEventKind::Message(text.as_str().to_owned())),
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                }
                // Binary, ping and pong frames carry nothing for this protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    emit(LinkEventKind::Error(e.to_string()));
                    break (None, e.to_string());
                }
                None => break (None, "connection dropped".to_string()),
            },
        }
    };

    shared.set_state(epoch, ConnectionState::Disconnected);
    info!("Connection {} closed (code {:?}): {}", epoch, code, reason);
    emit(LinkEventKind::Close { code, reason });
}
