//! State machines for operations and certificate rotation.

pub mod errors;
pub mod events;
pub mod operation_state_machine;
pub mod rotation;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::OperationEvent;
pub use operation_state_machine::OperationStateMachine;
pub use rotation::CertificateRotation;
pub use states::{OperationState, RotationState};
