pub mod machine;
pub mod operation;
pub mod registry;

pub use machine::{Advance, LoadError, PhaseError, ProcedureMachine, BUSY_MESSAGE};
pub use operation::{Operation, OperationError, Progress};
pub use registry::{ProcedureFactory, ProcedureRegistry};
