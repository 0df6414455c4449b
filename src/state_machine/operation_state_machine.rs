use chrono::Utc;

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::OperationEvent,
    states::OperationState,
};
use crate::models::Operation;

/// Operation lifecycle transitions
///
/// ```text
/// in progress ──Succeed──▶ succeeded
///      │    └──Fail─────▶ failed
///      └──Cancel──▶ in progress (canceled_at set)
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationStateMachine;

impl OperationStateMachine {
    /// Determine the target state for an event without touching the operation
    pub fn determine_target_state(
        current_state: OperationState,
        event: &OperationEvent,
    ) -> StateMachineResult<OperationState> {
        let target = match (current_state, event) {
            (OperationState::InProgress, OperationEvent::Succeed) => OperationState::Succeeded,
            (OperationState::InProgress, OperationEvent::Fail(_)) => OperationState::Failed,
            (OperationState::InProgress, OperationEvent::Cancel) => OperationState::InProgress,
            (from_state, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Apply an event to an operation in place
    ///
    /// Canceling twice keeps the first timestamp. A canceled operation can no
    /// longer fail or succeed: it simply stops progressing.
    pub fn apply(
        operation: &mut Operation,
        event: &OperationEvent,
    ) -> StateMachineResult<OperationState> {
        let target = Self::determine_target_state(operation.state, event)?;

        if operation.canceled_at.is_some() && !matches!(event, OperationEvent::Cancel) {
            return Err(StateMachineError::AlreadyCanceled {
                operation_id: operation.id,
            });
        }

        match event {
            OperationEvent::Cancel => {
                if operation.canceled_at.is_none() {
                    operation.canceled_at = Some(Utc::now());
                }
            }
            OperationEvent::Fail(message) => {
                operation.error_message = Some(message.clone());
            }
            OperationEvent::Succeed => {}
        }

        operation.state = target;
        operation.updated_at = Utc::now();

        tracing::debug!(
            operation_id = operation.id,
            event = event.event_type(),
            state = %target,
            "Operation transition applied"
        );

        Ok(target)
    }
}
