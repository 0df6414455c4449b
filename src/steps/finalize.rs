//! Final bookkeeping steps of a pipeline

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::constants::step_descriptions;
use crate::error::{BrokerError, Result};
use crate::logging::log_pipeline_operation;
use crate::models::Operation;
use crate::pipeline::{Step, StepContext, StepId};
use crate::scheduler::RetryClass;
use crate::state_machine::{OperationEvent, OperationStateMachine};

/// Move the operation to succeeded with the final progress text
async fn succeed(ctx: &StepContext, operation_id: i64) -> Result<()> {
    let mut operation = ctx.load_operation(operation_id).await?;
    if operation.state.is_terminal() {
        return Ok(());
    }

    OperationStateMachine::apply(&mut operation, &OperationEvent::Succeed)?;
    operation.step_description = Some(step_descriptions::COMPLETE.to_string());
    ctx.store.update_operation(&operation).await?;

    log_pipeline_operation(
        operation.id,
        &operation.service_instance_id,
        operation.action.as_str(),
        operation.state.as_str(),
        None,
    );
    Ok(())
}

/// Plan migration: the instance now behaves as the target kind
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchInstanceKind;

#[async_trait]
impl Step for SwitchInstanceKind {
    fn id(&self) -> StepId {
        StepId::SwitchInstanceKind
    }

    fn description(&self) -> &'static str {
        step_descriptions::SWITCH_INSTANCE_KIND
    }

    fn retry_class(&self) -> RetryClass {
        RetryClass::NonRetriable
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let target = operation.migration_target.ok_or_else(|| {
            BrokerError::validation(format!("operation {} has no migration target", operation.id))
        })?;
        let mut instance = ctx.load_instance(operation).await?;
        if instance.kind == target {
            return Ok(());
        }

        let from = instance.kind;
        instance.kind = target;
        ctx.store.update_instance(&instance).await?;

        info!(
            service_instance_id = %instance.id,
            from = %from,
            to = %target,
            "Instance migrated to new plan"
        );
        Ok(())
    }
}

/// Deprovision: deactivate the instance and close the operation
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkDeprovisioned;

#[async_trait]
impl Step for MarkDeprovisioned {
    fn id(&self) -> StepId {
        StepId::MarkDeprovisioned
    }

    fn description(&self) -> &'static str {
        step_descriptions::MARK_DEPROVISIONED
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if instance.deactivated_at.is_none() {
            instance.deactivated_at = Some(Utc::now());
            ctx.store.update_instance(&instance).await?;
        }
        succeed(ctx, operation.id).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkSucceeded;

#[async_trait]
impl Step for MarkSucceeded {
    fn id(&self) -> StepId {
        StepId::MarkSucceeded
    }

    fn description(&self) -> &'static str {
        step_descriptions::COMPLETE
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        succeed(ctx, operation.id).await
    }
}
