//! CDN distribution lifecycle

use async_trait::async_trait;
use tracing::{debug, info};

use super::resource_tags;
use crate::adapters::{poll_until, DistributionConfig, DistributionStatus};
use crate::constants::{naming, step_descriptions};
use crate::error::{AdapterError, AdapterResultExt, BrokerError, Result};
use crate::models::{Operation, ServiceInstance};
use crate::pipeline::{Step, StepContext, StepId};
use crate::scheduler::RetryClass;
use crate::state_machine::CertificateRotation;

/// Server certificate the distribution should serve
///
/// The certificate being rotated in wins; it must be uploaded by now.
async fn serving_certificate_id(ctx: &StepContext, instance: &ServiceInstance) -> Result<Option<String>> {
    if let Some(certificate) = ctx.new_certificate(instance).await? {
        return certificate
            .iam_server_certificate_id
            .clone()
            .map(Some)
            .ok_or_else(|| {
                BrokerError::invalid_state(format!(
                    "certificate {} has not been uploaded",
                    certificate.id
                ))
            });
    }

    Ok(ctx
        .current_certificate(instance)
        .await?
        .and_then(|certificate| certificate.iam_server_certificate_id))
}

/// Copy the instance's origin policy onto a distribution config
fn apply_instance_settings(ctx: &StepContext, instance: &ServiceInstance, config: &mut DistributionConfig) {
    config.aliases = instance.domain_names.clone();
    config.origin_hostname = instance
        .cdn
        .origin_hostname
        .clone()
        .unwrap_or_else(|| ctx.config.cdn.default_origin.clone());
    config.origin_path = instance.cdn.origin_path.clone();
    config.origin_protocol_policy = instance.cdn.origin_protocol_policy.clone();
    config.forward_cookie_policy = instance.cdn.forward_cookie_policy.clone();
    config.forwarded_cookies = instance.cdn.forwarded_cookies.clone();
    config.forwarded_headers = instance.cdn.forwarded_headers.clone();
    config.error_responses = instance.cdn.error_responses.clone();
    if instance.dedicated_waf.web_acl_arn.is_some() {
        config.web_acl_arn = instance.dedicated_waf.web_acl_arn.clone();
    }
}

fn distribution_id(instance: &ServiceInstance) -> Result<&str> {
    instance.cdn.distribution_id.as_deref().ok_or_else(|| {
        BrokerError::invalid_state(format!("service instance {} has no distribution", instance.id))
    })
}

async fn wait_for_deployed(ctx: &StepContext, id: &str, tolerate_missing: bool) -> Result<()> {
    let cdn = &ctx.adapters.cdn;
    poll_until(
        "distribution deployment",
        ctx.config.cdn.poll_interval(),
        ctx.config.cdn.max_poll_attempts,
        move || async move {
            match cdn.get_status(id).await {
                Ok(status) => Ok(status == DistributionStatus::Deployed),
                Err(e) if tolerate_missing && e.is_not_found() => Ok(true),
                Err(e) => Err(e),
            }
        },
    )
    .await
}

/// Create the distribution and attach the new certificate to it
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateDistribution;

#[async_trait]
impl Step for CreateDistribution {
    fn id(&self) -> StepId {
        StepId::CreateDistribution
    }

    fn description(&self) -> &'static str {
        step_descriptions::CREATE_DISTRIBUTION
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;

        if instance.cdn.distribution_id.is_none() {
            let mut config = DistributionConfig {
                caller_reference: naming::distribution_caller_reference(&instance.id, operation.id),
                server_certificate_id: serving_certificate_id(ctx, &instance).await?,
                enabled: true,
                ..DistributionConfig::default()
            };
            apply_instance_settings(ctx, &instance, &mut config);

            let cdn = &ctx.adapters.cdn;
            let distribution = match cdn.create_distribution(&config, &resource_tags(ctx, &instance)).await {
                Ok(distribution) => distribution,
                Err(AdapterError::AlreadyExists { .. }) => {
                    // created by an earlier attempt that never got to persist it
                    match cdn.find_distribution(&config.caller_reference).await? {
                        Some(existing) => {
                            debug!(distribution_id = %existing.id, "Distribution already created; adopting it");
                            existing
                        }
                        None => {
                            return Err(AdapterError::already_exists("cdn", &config.caller_reference).into())
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            };

            info!(
                service_instance_id = %instance.id,
                distribution_id = %distribution.id,
                "Distribution created"
            );
            instance.cdn.distribution_id = Some(distribution.id);
            instance.cdn.distribution_arn = Some(distribution.arn);
            instance.domain_internal = Some(distribution.domain_name);
        }

        instance.route53_alias_hosted_zone = Some(ctx.config.cdn.hosted_zone_id.clone());
        CertificateRotation::attach(&mut instance);
        ctx.store.update_instance(&instance).await?;
        Ok(())
    }
}

/// Block until the distribution reports deployed
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitForDistribution;

#[async_trait]
impl Step for WaitForDistribution {
    fn id(&self) -> StepId {
        StepId::WaitForDistribution
    }

    fn description(&self) -> &'static str {
        step_descriptions::WAIT_FOR_DISTRIBUTION
    }

    fn retry_class(&self) -> RetryClass {
        RetryClass::Fast
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        wait_for_deployed(ctx, distribution_id(&instance)?, false).await
    }
}

/// Push domains, origin policy, web ACL and certificate to the distribution
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateDistribution;

#[async_trait]
impl Step for UpdateDistribution {
    fn id(&self) -> StepId {
        StepId::UpdateDistribution
    }

    fn description(&self) -> &'static str {
        step_descriptions::UPDATE_DISTRIBUTION
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        let id = distribution_id(&instance)?.to_string();

        let (mut config, etag) = ctx.adapters.cdn.get_distribution_config(&id).await?;
        apply_instance_settings(ctx, &instance, &mut config);
        if let Some(certificate_id) = serving_certificate_id(ctx, &instance).await? {
            config.server_certificate_id = Some(certificate_id);
        }
        ctx.adapters.cdn.update_distribution(&id, &config, &etag).await?;

        CertificateRotation::attach(&mut instance);
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, distribution_id = %id, "Distribution updated");
        Ok(())
    }
}

/// Renewal: swap only the served certificate
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateDistributionCertificate;

#[async_trait]
impl Step for UpdateDistributionCertificate {
    fn id(&self) -> StepId {
        StepId::UpdateDistributionCertificate
    }

    fn description(&self) -> &'static str {
        step_descriptions::UPDATE_DISTRIBUTION_CERTIFICATE
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if instance.new_certificate_id.is_none() {
            return Ok(());
        }
        let id = distribution_id(&instance)?.to_string();

        let (mut config, etag) = ctx.adapters.cdn.get_distribution_config(&id).await?;
        config.server_certificate_id = serving_certificate_id(ctx, &instance).await?;
        ctx.adapters.cdn.update_distribution(&id, &config, &etag).await?;

        CertificateRotation::attach(&mut instance);
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, distribution_id = %id, "Distribution certificate replaced");
        Ok(())
    }
}

/// Disable the distribution so it can be deleted
#[derive(Debug, Clone, Copy, Default)]
pub struct DisableDistribution;

#[async_trait]
impl Step for DisableDistribution {
    fn id(&self) -> StepId {
        StepId::DisableDistribution
    }

    fn description(&self) -> &'static str {
        step_descriptions::DISABLE_DISTRIBUTION
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let Some(id) = instance.cdn.distribution_id.as_deref() else {
            return Ok(());
        };

        let Some((mut config, etag)) = ctx
            .adapters
            .cdn
            .get_distribution_config(id)
            .await
            .ignore_not_found()?
        else {
            debug!(distribution_id = %id, "Distribution already gone");
            return Ok(());
        };

        if config.enabled {
            config.enabled = false;
            ctx.adapters.cdn.update_distribution(id, &config, &etag).await?;
            info!(service_instance_id = %instance.id, distribution_id = %id, "Distribution disabled");
        }
        Ok(())
    }
}

/// Block until the disabled distribution has deployed
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitForDistributionDisabled;

#[async_trait]
impl Step for WaitForDistributionDisabled {
    fn id(&self) -> StepId {
        StepId::WaitForDistributionDisabled
    }

    fn description(&self) -> &'static str {
        step_descriptions::WAIT_FOR_DISABLED
    }

    fn retry_class(&self) -> RetryClass {
        RetryClass::Fast
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        match instance.cdn.distribution_id.as_deref() {
            Some(id) => wait_for_deployed(ctx, id, true).await,
            None => Ok(()),
        }
    }
}

/// Delete the disabled distribution and forget it
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteDistribution;

#[async_trait]
impl Step for DeleteDistribution {
    fn id(&self) -> StepId {
        StepId::DeleteDistribution
    }

    fn description(&self) -> &'static str {
        step_descriptions::DELETE_DISTRIBUTION
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        let Some(id) = instance.cdn.distribution_id.clone() else {
            return Ok(());
        };

        let existing = ctx
            .adapters
            .cdn
            .get_distribution_config(&id)
            .await
            .ignore_not_found()?;
        if let Some((_, etag)) = existing {
            ctx.adapters
                .cdn
                .delete_distribution(&id, &etag)
                .await
                .ignore_not_found()?;
            info!(service_instance_id = %instance.id, distribution_id = %id, "Distribution deleted");
        }

        instance.cdn.distribution_id = None;
        instance.cdn.distribution_arn = None;
        ctx.store.update_instance(&instance).await?;
        Ok(())
    }
}

/// Take over a distribution created by the legacy broker
#[derive(Debug, Clone, Copy, Default)]
pub struct AdoptDistribution;

#[async_trait]
impl Step for AdoptDistribution {
    fn id(&self) -> StepId {
        StepId::AdoptDistribution
    }

    fn description(&self) -> &'static str {
        step_descriptions::ADOPT_DISTRIBUTION
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        let id = distribution_id(&instance)?.to_string();

        let distribution = ctx.adapters.cdn.get_distribution(&id).await?;
        let (existing, _) = ctx.adapters.cdn.get_distribution_config(&id).await?;

        if instance.cdn.origin_hostname.is_none() && !existing.origin_hostname.is_empty() {
            instance.cdn.origin_hostname = Some(existing.origin_hostname);
            instance.cdn.origin_path = existing.origin_path;
            instance.cdn.origin_protocol_policy = existing.origin_protocol_policy;
            instance.cdn.forward_cookie_policy = existing.forward_cookie_policy;
            instance.cdn.forwarded_cookies = existing.forwarded_cookies;
            instance.cdn.forwarded_headers = existing.forwarded_headers;
            instance.cdn.error_responses = existing.error_responses;
        }
        instance.cdn.distribution_arn = Some(distribution.arn);
        instance.domain_internal = Some(distribution.domain_name);
        instance.route53_alias_hosted_zone = Some(ctx.config.cdn.hosted_zone_id.clone());
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, distribution_id = %id, "Distribution adopted");
        Ok(())
    }
}
