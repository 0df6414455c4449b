use async_trait::async_trait;

use crate::models::Operation;
use crate::pipeline::StepId;

/// What a pre-execution hook decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    Proceed,
    /// Stop the chain without failing the operation
    Cancel { reason: String },
}

/// Runs before every step execution
#[async_trait]
pub trait PreExecutionHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn before_step(&self, operation: &Operation, step: StepId) -> HookDecision;
}

/// Stops the chain once an operation has been canceled
#[derive(Debug, Clone, Copy, Default)]
pub struct CancellationHook;

#[async_trait]
impl PreExecutionHook for CancellationHook {
    fn name(&self) -> &'static str {
        "cancellation"
    }

    async fn before_step(&self, operation: &Operation, _step: StepId) -> HookDecision {
        match operation.canceled_at {
            Some(canceled_at) => HookDecision::Cancel {
                reason: format!("operation canceled at {}", canceled_at.to_rfc3339()),
            },
            None => HookDecision::Proceed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOperation, OperationAction};
    use chrono::Utc;

    #[tokio::test]
    async fn test_cancellation_hook() {
        let mut op = Operation::from_new(1, NewOperation::new("4321", OperationAction::Provision));
        assert_eq!(
            CancellationHook.before_step(&op, StepId::GeneratePrivateKey).await,
            HookDecision::Proceed
        );

        op.canceled_at = Some(Utc::now());
        assert!(matches!(
            CancellationHook.before_step(&op, StepId::GeneratePrivateKey).await,
            HookDecision::Cancel { .. }
        ));
    }
}
