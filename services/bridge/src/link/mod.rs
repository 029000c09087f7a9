pub mod protocol;
pub mod session;
pub mod transport;

// Re-export the main entry points so the controller and the binary can reach
// them without spelling out the module path.
pub use protocol::CommandKind;
pub use session::{ProtocolSession, SentMessage};
pub use transport::{Connection, ConnectionState, Link, LinkEvent, LinkEventKind, TransportError};
