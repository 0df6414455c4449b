//! Health checks and DDoS protection for the dedicated WAF plan

use async_trait::async_trait;
use tracing::{debug, info};

use crate::adapters::health_check_arn;
use crate::constants::step_descriptions;
use crate::error::{AdapterResultExt, Result};
use crate::models::{HealthCheckRecord, Operation, ShieldAssociation};
use crate::pipeline::{Step, StepContext, StepId};

/// One DNS health check per domain
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateHealthChecks;

#[async_trait]
impl Step for CreateHealthChecks {
    fn id(&self) -> StepId {
        StepId::CreateHealthChecks
    }

    fn description(&self) -> &'static str {
        step_descriptions::CREATE_HEALTH_CHECKS
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;

        for domain in instance.domain_names.clone() {
            let exists = instance
                .dedicated_waf
                .health_checks
                .iter()
                .any(|record| record.domain_name == domain);
            if exists {
                continue;
            }

            let caller_reference = format!("{}-{}", instance.id, domain);
            let health_check_id = ctx
                .adapters
                .dns
                .create_health_check(&domain, &caller_reference)
                .await?;
            instance.dedicated_waf.health_checks.push(HealthCheckRecord {
                domain_name: domain.clone(),
                health_check_id,
            });
            // One save per check so a retry does not create it twice
            ctx.store.update_instance(&instance).await?;
            debug!(service_instance_id = %instance.id, domain = %domain, "Health check created");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteHealthChecks;

#[async_trait]
impl Step for DeleteHealthChecks {
    fn id(&self) -> StepId {
        StepId::DeleteHealthChecks
    }

    fn description(&self) -> &'static str {
        step_descriptions::DELETE_HEALTH_CHECKS
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if instance.dedicated_waf.health_checks.is_empty() {
            return Ok(());
        }

        for record in &instance.dedicated_waf.health_checks {
            ctx.adapters
                .dns
                .delete_health_check(&record.health_check_id)
                .await
                .ignore_not_found()?;
        }
        let deleted = instance.dedicated_waf.health_checks.len();
        instance.dedicated_waf.health_checks.clear();
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, deleted, "Health checks deleted");
        Ok(())
    }
}

/// Register the first health check with the distribution's protection
#[derive(Debug, Clone, Copy, Default)]
pub struct AssociateShield;

#[async_trait]
impl Step for AssociateShield {
    fn id(&self) -> StepId {
        StepId::AssociateShield
    }

    fn description(&self) -> &'static str {
        step_descriptions::ASSOCIATE_SHIELD
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if instance.dedicated_waf.shield_association.is_some() {
            return Ok(());
        }
        let (Some(distribution_arn), Some(health_check)) = (
            instance.cdn.distribution_arn.clone(),
            instance.dedicated_waf.health_checks.first().cloned(),
        ) else {
            return Ok(());
        };

        let Some(protection_id) = ctx
            .adapters
            .shield
            .find_protection_id(&distribution_arn)
            .await?
        else {
            debug!(distribution_arn = %distribution_arn, "Distribution has no DDoS protection");
            return Ok(());
        };

        ctx.adapters
            .shield
            .associate_health_check(&protection_id, &health_check_arn(&health_check.health_check_id))
            .await?;
        instance.dedicated_waf.shield_association = Some(ShieldAssociation {
            domain_name: health_check.domain_name,
            health_check_id: health_check.health_check_id,
            protection_id,
        });
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, "Health check associated with DDoS protection");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DisassociateShield;

#[async_trait]
impl Step for DisassociateShield {
    fn id(&self) -> StepId {
        StepId::DisassociateShield
    }

    fn description(&self) -> &'static str {
        step_descriptions::DISASSOCIATE_SHIELD
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        let Some(association) = instance.dedicated_waf.shield_association.take() else {
            return Ok(());
        };

        ctx.adapters
            .shield
            .disassociate_health_check(
                &association.protection_id,
                &health_check_arn(&association.health_check_id),
            )
            .await
            .ignore_not_found()?;
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, "Health check disassociated from DDoS protection");
        Ok(())
    }
}
