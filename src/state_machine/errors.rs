use thiserror::Error;

/// State machine errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Operation {operation_id} was already canceled")]
    AlreadyCanceled { operation_id: i64 },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;

impl From<StateMachineError> for crate::error::BrokerError {
    fn from(error: StateMachineError) -> Self {
        crate::error::BrokerError::InvalidState(error.to_string())
    }
}
