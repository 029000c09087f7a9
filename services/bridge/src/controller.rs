//! services/bridge/src/controller.rs
//!
//! The main control loop of the bridge.
//!
//! A single task owns the connection, the protocol session, the scene and the
//! loaded procedure. Link events, operator requests and the movement ticker are
//! all serialized through one `select!` loop, so no procedure state is ever
//! touched from two places at once.

use crate::{
    config::Config,
    error::BridgeError,
    link::{Connection, ConnectionState, LinkEvent, LinkEventKind, ProtocolSession, SentMessage},
    procedure::{Advance, LoadError, ProcedureMachine, ProcedureRegistry},
};
use neuro_surgery_core::Scene;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

/// Sent back for any invocation that arrives before a procedure is loaded.
pub const NO_PROCEDURE_MESSAGE: &str = "No procedure is loaded";

const REQUEST_CAPACITY: usize = 32;

//=========================================================================================
// Operator Requests
//=========================================================================================

/// Everything the operator can ask the bridge to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Connects to the given URL, or to the configured one.
    Connect(Option<String>),
    Disconnect,
    ListProcedures,
    Load(String),
    AdvancePhase,
    SetPhase(String),
    Reset,
    CancelOperation,
    Status,
    Shutdown,
}

struct Request {
    command: ControlCommand,
    reply: oneshot::Sender<String>,
}

/// Cloneable handle for sending requests into the running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    requests: mpsc::Sender<Request>,
}

impl ControllerHandle {
    /// Sends `command` and waits for the controller's human-readable reply.
    pub async fn request(&self, command: ControlCommand) -> Result<String, BridgeError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request { command, reply })
            .await
            .map_err(|_| BridgeError::ControllerStopped)?;
        response.await.map_err(|_| BridgeError::ControllerStopped)
    }
}

//=========================================================================================
// Controller
//=========================================================================================

pub struct Controller {
    events: mpsc::UnboundedReceiver<LinkEvent>,
    requests: mpsc::Receiver<Request>,
    bridge: Bridge,
}

/// The state mutated by the control loop.
struct Bridge {
    config: Config,
    connection: Arc<Connection>,
    session: ProtocolSession,
    registry: ProcedureRegistry,
    scene: Box<dyn Scene>,
    machine: Option<ProcedureMachine>,
    autoloaded: bool,
}

impl Controller {
    pub fn new(
        config: Config,
        registry: ProcedureRegistry,
        scene: Box<dyn Scene>,
    ) -> (Self, ControllerHandle) {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (request_tx, requests) = mpsc::channel(REQUEST_CAPACITY);
        let connection = Arc::new(Connection::new(event_tx));
        let session = ProtocolSession::new(connection.clone(), config.game_name.clone());

        let controller = Self {
            events,
            requests,
            bridge: Bridge {
                config,
                connection,
                session,
                registry,
                scene,
                machine: None,
                autoloaded: false,
            },
        };
        (controller, ControllerHandle { requests: request_tx })
    }

    /// Subscribes to the audit stream of outbound messages.
    pub fn subscribe(&self) -> broadcast::Receiver<SentMessage> {
        self.bridge.session.subscribe()
    }

    /// Runs until a `Shutdown` request arrives or every handle is dropped.
    pub async fn run(self) {
        let Controller {
            mut events,
            mut requests,
            mut bridge,
        } = self;

        if bridge.config.auto_connect {
            let url = bridge.config.ws_url.clone();
            bridge.connection.connect(&url);
        }

        let mut ticker = tokio::time::interval(bridge.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Controller started");
        loop {
            let moving = bridge.is_moving();
            tokio::select! {
                Some(event) = events.recv() => bridge.handle_link_event(event),
                request = requests.recv() => {
                    let Some(Request { command, reply }) = request else {
                        info!("All controller handles dropped");
                        break;
                    };
                    let shutdown = command == ControlCommand::Shutdown;
                    let response = bridge.handle_command(command);
                    if reply.send(response).is_err() {
                        debug!("Requester went away before the reply");
                    }
                    if shutdown {
                        break;
                    }
                }
                _ = ticker.tick(), if moving => bridge.tick(),
            }
        }

        bridge.shutdown();
        info!("Controller stopped");
    }
}

impl Bridge {
    fn is_moving(&self) -> bool {
        self.machine.as_ref().is_some_and(|m| m.is_moving())
    }

    //=====================================================================================
    // Link Events
    //=====================================================================================

    fn handle_link_event(&mut self, event: LinkEvent) {
        if event.epoch != self.connection.epoch() {
            debug!("Ignoring stale event from attempt {}", event.epoch);
            return;
        }

        match event.kind {
            LinkEventKind::Open => self.on_open(),
            LinkEventKind::Message(text) => self.on_message(&text),
            LinkEventKind::Close { code, reason } => {
                info!("Connection closed (code: {:?}, reason: '{}')", code, reason);
            }
            LinkEventKind::Error(reason) => {
                error!("Connection error: {}", reason);
            }
        }
    }

    fn on_open(&mut self) {
        info!("Peer connected, announcing {}", self.config.game_name);
        self.session.send_startup();

        if let Some(machine) = &self.machine {
            machine.reregister(&self.session);
            return;
        }
        if self.autoloaded {
            return;
        }
        self.autoloaded = true;
        let key = self.config.procedure.clone();
        match self.load(&key) {
            Ok(name) => info!("Auto-loaded procedure: {}", name),
            Err(e) => error!("Failed to auto-load '{}': {}", key, e),
        }
    }

    fn on_message(&mut self, text: &str) {
        let Some(invocation) = self.session.handle_frame(text) else {
            return;
        };
        match self.machine.as_mut() {
            Some(machine) => {
                machine.dispatch(&invocation, &self.session, self.scene.as_mut(), Instant::now());
            }
            None => {
                warn!("Action {} arrived with no procedure loaded", invocation.name);
                self.session
                    .send_action_result(&invocation.id, false, NO_PROCEDURE_MESSAGE);
            }
        }
    }

    fn tick(&mut self) {
        if let Some(machine) = self.machine.as_mut() {
            machine.tick(Instant::now(), &self.session, self.scene.as_mut());
        }
    }

    //=====================================================================================
    // Operator Commands
    //=====================================================================================

    fn handle_command(&mut self, command: ControlCommand) -> String {
        debug!("Operator command: {:?}", command);
        match command {
            ControlCommand::Connect(url) => {
                let url = url.unwrap_or_else(|| self.config.ws_url.clone());
                if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                    return format!("'{}' is not a ws:// or wss:// URL", url);
                }
                self.connection.connect(&url);
                format!("Connecting to {}", url)
            }
            ControlCommand::Disconnect => {
                self.connection.disconnect();
                ConnectionState::Disconnected.to_string()
            }
            ControlCommand::ListProcedures => self
                .registry
                .list()
                .into_iter()
                .map(|(key, description)| format!("{} - {}", key, description))
                .collect::<Vec<_>>()
                .join("\n"),
            ControlCommand::Load(key) => match self.load(&key) {
                Ok(name) => format!("Loaded {}", name),
                Err(e) => e.to_string(),
            },
            ControlCommand::AdvancePhase => self.with_machine(|machine, session, scene| {
                match machine.advance_phase(session, scene) {
                    Ok(Advance::Entered(key)) => format!("Phase changed to {}", key),
                    Ok(Advance::AlreadyAtFinalPhase) => "Already at the final phase".to_string(),
                    Err(e) => e.to_string(),
                }
            }),
            ControlCommand::SetPhase(key) => self.with_machine(|machine, session, scene| {
                match machine.set_phase(&key, session, scene) {
                    Ok(()) => format!("Phase changed to {}", key),
                    Err(e) => e.to_string(),
                }
            }),
            ControlCommand::Reset => self.with_machine(|machine, session, scene| {
                match machine.reset(session, scene) {
                    Ok(()) => format!("Reset to {}", machine.current_phase().key),
                    Err(e) => e.to_string(),
                }
            }),
            ControlCommand::CancelOperation => self.with_machine(|machine, session, scene| {
                if machine.cancel_operation(session, scene) {
                    "Operation cancelled".to_string()
                } else {
                    "Nothing is moving".to_string()
                }
            }),
            ControlCommand::Status => self.status(),
            ControlCommand::Shutdown => "Shutting down".to_string(),
        }
    }

    fn with_machine<F>(&mut self, f: F) -> String
    where
        F: FnOnce(&mut ProcedureMachine, &ProtocolSession, &mut dyn Scene) -> String,
    {
        match self.machine.as_mut() {
            Some(machine) => f(machine, &self.session, self.scene.as_mut()),
            None => NO_PROCEDURE_MESSAGE.to_string(),
        }
    }

    /// Instantiates `key` and swaps it in for the current procedure.
    fn load(&mut self, key: &str) -> Result<String, BridgeError> {
        if !self.session.is_connected() {
            return Err(LoadError::NotConnected.into());
        }
        let procedure = self.registry.create(key)?;
        if let Some(previous) = self.machine.take() {
            previous.unload(&self.session, self.scene.as_mut());
        }
        let machine = ProcedureMachine::load(procedure, &self.session, self.scene.as_mut())?;
        let name = machine.procedure_name().to_string();
        self.machine = Some(machine);
        Ok(name)
    }

    fn status(&self) -> String {
        let mut lines = vec![format!("Connection: {}", self.connection.state())];
        match &self.machine {
            None => lines.push(NO_PROCEDURE_MESSAGE.to_string()),
            Some(machine) => {
                let phase = machine.current_phase();
                lines.push(format!("Phase: {} ({})", phase.display_name, phase.key));
                lines.push(format!(
                    "Registered actions: [{}]",
                    machine.registered().names().join(", ")
                ));
                if let Some(operation) = machine.operation() {
                    lines.push(format!(
                        "Moving: {:?} of {}",
                        operation.request().kind,
                        operation.tool()
                    ));
                }
                lines.extend(machine.panel(self.scene.as_ref()));
            }
        }
        lines.join("\n")
    }

    fn shutdown(&mut self) {
        if let Some(machine) = self.machine.take() {
            machine.unload(&self.session, self.scene.as_mut());
        }
        self.connection.disconnect();
    }
}
