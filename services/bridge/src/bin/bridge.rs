//! services/bridge/src/bin/bridge.rs

use bridge_lib::{
    adapters::InMemoryScene,
    config::Config,
    console::{parse_line, ConsoleInput, HELP},
    controller::{ControlCommand, Controller, ControllerHandle},
    error::BridgeError,
    link::SentMessage,
    procedure::ProcedureRegistry,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting bridge for '{}'...", config.game_name);

    // --- 2. Build the Controller ---
    let (controller, handle) = Controller::new(
        config,
        ProcedureRegistry::builtin(),
        Box::new(InMemoryScene::new()),
    );
    tokio::spawn(log_sent_messages(controller.subscribe()));
    let controller_task = tokio::spawn(controller.run());

    // --- 3. Operator Console ---
    println!("{}", HELP);
    tokio::select! {
        result = read_console(&handle) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            if let Err(e) = handle.request(ControlCommand::Shutdown).await {
                warn!("Shutdown request failed: {}", e);
            }
        }
    }

    drop(handle);
    if let Err(e) = controller_task.await {
        return Err(BridgeError::Internal(format!("controller task failed: {}", e)));
    }
    info!("Bridge stopped.");
    Ok(())
}

/// Reads operator commands from stdin until `quit` or end of input.
async fn read_console(handle: &ControllerHandle) -> Result<(), BridgeError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            Ok(ConsoleInput::Empty) => {}
            Ok(ConsoleInput::Help) => println!("{}", HELP),
            Ok(ConsoleInput::Command(command)) => {
                let shutdown = command == ControlCommand::Shutdown;
                println!("{}", handle.request(command).await?);
                if shutdown {
                    return Ok(());
                }
            }
            Err(e) => println!("{}", e),
        }
    }
    info!("Console closed");
    handle.request(ControlCommand::Shutdown).await?;
    Ok(())
}

/// Writes every outbound message to the `audit` log target.
async fn log_sent_messages(mut sent: broadcast::Receiver<SentMessage>) {
    loop {
        match sent.recv().await {
            Ok(message) => {
                let data = message
                    .data
                    .as_ref()
                    .map(|data| data.to_string())
                    .unwrap_or_default();
                info!(
                    target: "audit",
                    "[{}] sent {} {}",
                    message.sent_at.format("%H:%M:%S%.3f"),
                    message.command,
                    data
                );
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(target: "audit", "Audit log skipped {} messages", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
