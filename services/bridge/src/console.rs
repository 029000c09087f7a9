//! services/bridge/src/console.rs
//!
//! Parses operator console lines into controller commands.

use crate::controller::ControlCommand;

pub const HELP: &str = "\
Commands:
  connect [url]   connect to the peer (default: NEURO_WS_URL)
  disconnect      close the connection
  procedures      list the available procedures
  load <key>      load a procedure
  next            advance to the next phase
  phase <key>     jump to a phase
  reset           return to the first phase
  cancel          stop the current movement
  status          show connection and procedure state
  quit            shut the bridge down";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConsoleError {
    #[error("Unknown command '{0}', type 'help' for a list")]
    UnknownCommand(String),
    #[error("'{0}' needs an argument: {1}")]
    MissingArgument(&'static str, &'static str),
    #[error("'{0}' takes no arguments")]
    UnexpectedArgument(&'static str),
}

/// One parsed console line.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleInput {
    Empty,
    Help,
    Command(ControlCommand),
}

pub fn parse_line(line: &str) -> Result<ConsoleInput, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(ConsoleInput::Empty);
    };
    let argument = words.next().map(str::to_string);
    if words.next().is_some() {
        return Err(ConsoleError::UnknownCommand(line.trim().to_string()));
    }

    let command = match (verb.to_lowercase().as_str(), argument) {
        ("help" | "?", _) => return Ok(ConsoleInput::Help),
        ("connect", url) => ControlCommand::Connect(url),
        ("load", Some(key)) => ControlCommand::Load(key),
        ("load", None) => return Err(ConsoleError::MissingArgument("load", "procedure key")),
        ("phase", Some(key)) => ControlCommand::SetPhase(key),
        ("phase", None) => return Err(ConsoleError::MissingArgument("phase", "phase key")),
        ("disconnect", None) => ControlCommand::Disconnect,
        ("procedures", None) => ControlCommand::ListProcedures,
        ("next", None) => ControlCommand::AdvancePhase,
        ("reset", None) => ControlCommand::Reset,
        ("cancel", None) => ControlCommand::CancelOperation,
        ("status", None) => ControlCommand::Status,
        ("quit" | "exit", None) => ControlCommand::Shutdown,
        (verb, Some(_)) => {
            return Err(match is_bare(verb) {
                Some(bare) => ConsoleError::UnexpectedArgument(bare),
                None => ConsoleError::UnknownCommand(verb.to_string()),
            });
        }
        (verb, None) => return Err(ConsoleError::UnknownCommand(verb.to_string())),
    };
    Ok(ConsoleInput::Command(command))
}

/// Commands that take no argument.
fn is_bare(verb: &str) -> Option<&'static str> {
    ["disconnect", "procedures", "next", "reset", "cancel", "status", "quit", "exit"]
        .into_iter()
        .find(|bare| *bare == verb)
}
