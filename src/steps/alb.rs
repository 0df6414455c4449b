//! Load balancer selection and listener certificates

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::adapters::WebAclScope;
use crate::constants::{naming, step_descriptions, tags};
use crate::error::{AdapterError, AdapterResultExt, BrokerError, Result};
use crate::models::{Certificate, Operation, ServiceInstance};
use crate::pipeline::{Step, StepContext, StepId};
use crate::scheduler::RetryClass;
use crate::state_machine::CertificateRotation;

fn listener_arn(instance: &ServiceInstance) -> Result<&str> {
    instance.alb.alb_listener_arn.as_deref().ok_or_else(|| {
        BrokerError::invalid_state(format!("service instance {} has no listener", instance.id))
    })
}

/// Point the instance at a listener, remembering the one it leaves
async fn assign_listener(
    ctx: &StepContext,
    instance: &mut ServiceInstance,
    listener_arn: &str,
    alb_arn: &str,
) -> Result<()> {
    let address = ctx.adapters.load_balancer.describe_load_balancer(alb_arn).await?;

    if let Some(old_listener) = instance.alb.alb_listener_arn.take() {
        if old_listener != listener_arn {
            instance.alb.previous_alb_listener_arn = Some(old_listener);
            instance.alb.previous_alb_arn = instance.alb.alb_arn.clone();
        }
    }
    instance.alb.alb_listener_arn = Some(listener_arn.to_string());
    instance.alb.alb_arn = Some(alb_arn.to_string());
    instance.domain_internal = Some(address.dns_name);
    instance.route53_alias_hosted_zone = Some(address.hosted_zone_id);
    ctx.store.update_instance(instance).await
}

/// Listener from `candidates` with the fewest certificates on the provider
/// side, if any has room
async fn least_loaded_listener(ctx: &StepContext, candidates: &[String]) -> Result<Option<String>> {
    let capacity = ctx.config.alb.max_certificates_per_listener;
    let mut best: Option<(usize, &String)> = None;

    for listener in candidates {
        let count = ctx
            .adapters
            .load_balancer
            .list_listener_certificates(listener)
            .await?
            .len();
        debug!(listener_arn = %listener, certificates = count, "Listener load");
        if count < capacity && best.map_or(true, |(lowest, _)| count < lowest) {
            best = Some((count, listener));
        }
    }
    Ok(best.map(|(_, listener)| listener.clone()))
}

/// Shared plan: least-loaded shared listener
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectAlb;

#[async_trait]
impl Step for SelectAlb {
    fn id(&self) -> StepId {
        StepId::SelectAlb
    }

    fn description(&self) -> &'static str {
        step_descriptions::SELECT_ALB
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if instance.alb.alb_listener_arn.is_some() {
            return Ok(());
        }

        let listener = least_loaded_listener(ctx, &ctx.config.alb.shared_listener_arns)
            .await?
            .ok_or_else(|| {
                AdapterError::transient("load balancer", "no shared listener has certificate capacity")
            })?;
        let alb_arn = ctx.adapters.load_balancer.listener_load_balancer(&listener).await?;
        assign_listener(ctx, &mut instance, &listener, &alb_arn).await?;

        info!(
            service_instance_id = %instance.id,
            listener_arn = %listener,
            alb_arn = %alb_arn,
            "Shared listener selected"
        );
        Ok(())
    }
}

/// Dedicated plan: least-loaded listener bound to the instance's org, else a
/// fresh listener bound to it now
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectDedicatedAlb;

#[async_trait]
impl Step for SelectDedicatedAlb {
    fn id(&self) -> StepId {
        StepId::SelectDedicatedAlb
    }

    fn description(&self) -> &'static str {
        step_descriptions::SELECT_ALB
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        let org = instance.org_id.clone().ok_or_else(|| {
            BrokerError::validation(format!(
                "service instance {} has no organization for a dedicated load balancer",
                instance.id
            ))
        })?;

        let pool = ctx.store.list_dedicated_listeners().await?;
        let owned: Vec<_> = pool
            .iter()
            .filter(|listener| listener.dedicated_org.as_deref() == Some(org.as_str()))
            .collect();

        if let Some(current) = instance.alb.alb_listener_arn.as_deref() {
            if owned.iter().any(|listener| listener.listener_arn == current) {
                debug!(service_instance_id = %instance.id, "Already on a dedicated listener");
                return Ok(());
            }
        }

        // Local counts only prefilter; the provider count decides
        let capacity = ctx.config.alb.max_certificates_per_listener;
        let mut candidates = Vec::with_capacity(owned.len());
        for listener in &owned {
            let local = ctx.store.count_instances_on_listener(&listener.listener_arn).await?;
            if usize::try_from(local).unwrap_or(usize::MAX) < capacity {
                candidates.push(listener.listener_arn.clone());
            }
        }
        let mut chosen = least_loaded_listener(ctx, &candidates).await?;

        if chosen.is_none() {
            for listener in pool.iter().filter(|listener| listener.dedicated_org.is_none()) {
                // Bind before using so a concurrent provision sees it taken
                if ctx.store.assign_listener_org(&listener.listener_arn, &org).await? {
                    info!(listener_arn = %listener.listener_arn, org = %org, "Listener bound to organization");
                    chosen = Some(listener.listener_arn.clone());
                    break;
                }
            }
        }

        let listener = chosen.ok_or_else(|| {
            AdapterError::transient(
                "load balancer",
                format!("no dedicated listener capacity for organization {org}"),
            )
        })?;
        let alb_arn = pool
            .iter()
            .find(|row| row.listener_arn == listener)
            .map(|row| row.alb_arn.clone())
            .ok_or_else(|| BrokerError::not_found("dedicated listener", &listener))?;

        ctx.store.ensure_dedicated_alb(&alb_arn, Some(&org)).await?;
        assign_listener(ctx, &mut instance, &listener, &alb_arn).await?;

        info!(
            service_instance_id = %instance.id,
            listener_arn = %listener,
            alb_arn = %alb_arn,
            org = %org,
            "Dedicated listener selected"
        );
        Ok(())
    }
}

/// One regional web ACL per dedicated load balancer
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsureAlbWebAcl;

#[async_trait]
impl Step for EnsureAlbWebAcl {
    fn id(&self) -> StepId {
        StepId::EnsureAlbWebAcl
    }

    fn description(&self) -> &'static str {
        step_descriptions::ENSURE_ALB_WEB_ACL
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let alb_arn = instance.alb.alb_arn.as_deref().ok_or_else(|| {
            BrokerError::invalid_state(format!("service instance {} has no load balancer", instance.id))
        })?;
        let mut alb = ctx
            .store
            .get_dedicated_alb(alb_arn)
            .await?
            .ok_or_else(|| BrokerError::not_found("dedicated load balancer", alb_arn))?;
        if alb.has_web_acl() {
            return Ok(());
        }

        let name = naming::alb_web_acl_name(&ctx.config.waf.name_prefix, alb.id);
        let mut acl_tags: BTreeMap<String, String> = ctx.config.tags.clone();
        acl_tags.insert(tags::MANAGED_BY.to_string(), tags::MANAGED_BY_VALUE.to_string());

        let waf = &ctx.adapters.waf;
        let web_acl = match waf
            .create_web_acl(&name, WebAclScope::Regional, &ctx.config.waf.rule_group_arns, &acl_tags)
            .await
        {
            Ok(acl) => acl,
            Err(AdapterError::AlreadyExists { .. }) => waf.get_web_acl(&name, WebAclScope::Regional).await?.0,
            Err(e) => return Err(e.into()),
        };
        waf.associate_web_acl(&web_acl.arn, alb_arn).await?;

        alb.dedicated_waf_web_acl_id = Some(web_acl.id);
        alb.dedicated_waf_web_acl_arn = Some(web_acl.arn);
        alb.dedicated_waf_web_acl_name = Some(web_acl.name);
        ctx.store.update_dedicated_alb(&alb).await?;

        info!(alb_arn = %alb_arn, web_acl = %name, "Web ACL associated with load balancer");
        Ok(())
    }
}

/// Put the new (else current) certificate on the instance's listener
#[derive(Debug, Clone, Copy, Default)]
pub struct AddCertificateToAlb;

#[async_trait]
impl Step for AddCertificateToAlb {
    fn id(&self) -> StepId {
        StepId::AddCertificateToAlb
    }

    fn description(&self) -> &'static str {
        step_descriptions::ADD_CERTIFICATE_TO_ALB
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        let certificate = match ctx.new_certificate(&instance).await? {
            Some(certificate) => certificate,
            None => ctx.current_certificate(&instance).await?.ok_or_else(|| {
                BrokerError::invalid_state(format!("service instance {} has no certificate", instance.id))
            })?,
        };
        let certificate_arn = certificate.iam_server_certificate_arn.as_deref().ok_or_else(|| {
            BrokerError::invalid_state(format!("certificate {} has not been uploaded", certificate.id))
        })?;
        let listener = listener_arn(&instance)?.to_string();

        let attached = ctx
            .adapters
            .load_balancer
            .list_listener_certificates(&listener)
            .await?;
        if !attached.iter().any(|arn| arn == certificate_arn) {
            ctx.adapters
                .load_balancer
                .add_listener_certificate(&listener, certificate_arn)
                .await?;
            info!(
                service_instance_id = %instance.id,
                certificate_id = certificate.id,
                listener_arn = %listener,
                "Certificate added to listener"
            );
        }

        CertificateRotation::attach(&mut instance);
        ctx.store.update_instance(&instance).await?;
        Ok(())
    }
}

/// Keep old and new certificates side by side long enough for in-flight
/// handshakes to finish
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitForCertificatePropagation;

#[async_trait]
impl Step for WaitForCertificatePropagation {
    fn id(&self) -> StepId {
        StepId::WaitForCertificatePropagation
    }

    fn description(&self) -> &'static str {
        step_descriptions::WAIT_FOR_CERTIFICATE_PROPAGATION
    }

    fn retry_class(&self) -> RetryClass {
        RetryClass::Fast
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let certificates = ctx.store.list_certificates(&instance.id).await?;
        let has_old = instance.alb.previous_alb_listener_arn.is_some()
            || CertificateRotation::superseded(&instance, &certificates)
                .iter()
                .any(|certificate| certificate.is_uploaded());

        if has_old {
            debug!(
                service_instance_id = %instance.id,
                overlap_seconds = ctx.config.alb.certificate_overlap_seconds,
                "Waiting before removing old certificate"
            );
            tokio::time::sleep(ctx.config.alb.certificate_overlap()).await;
        }
        Ok(())
    }
}

/// Remove from `listener` every attached certificate among `certificates`
async fn detach_certificates(
    ctx: &StepContext,
    listener: &str,
    certificates: &[&Certificate],
) -> Result<usize> {
    let Some(attached) = ctx
        .adapters
        .load_balancer
        .list_listener_certificates(listener)
        .await
        .ignore_not_found()?
    else {
        warn!(listener_arn = %listener, "Listener no longer exists");
        return Ok(0);
    };

    let mut removed = 0;
    for certificate in certificates {
        let Some(arn) = certificate.iam_server_certificate_arn.as_deref() else {
            continue;
        };
        if attached.iter().any(|attached_arn| attached_arn == arn) {
            ctx.adapters
                .load_balancer
                .remove_listener_certificate(listener, arn)
                .await
                .ignore_not_found()?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// After the overlap: drop superseded certificates from the listener and
/// everything from a listener the instance moved away from
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOldCertificateFromAlb;

#[async_trait]
impl Step for RemoveOldCertificateFromAlb {
    fn id(&self) -> StepId {
        StepId::RemoveOldCertificateFromAlb
    }

    fn description(&self) -> &'static str {
        step_descriptions::REMOVE_OLD_CERTIFICATE_FROM_ALB
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        let certificates = ctx.store.list_certificates(&instance.id).await?;
        let superseded = CertificateRotation::superseded(&instance, &certificates);

        let mut removed = 0;
        if let Some(listener) = instance.alb.alb_listener_arn.as_deref() {
            removed += detach_certificates(ctx, listener, &superseded).await?;
        }

        if let Some(previous) = instance.alb.previous_alb_listener_arn.clone() {
            let all: Vec<&Certificate> = certificates.iter().collect();
            removed += detach_certificates(ctx, &previous, &all).await?;

            instance.alb.previous_alb_listener_arn = None;
            instance.alb.previous_alb_arn = None;
            ctx.store.update_instance(&instance).await?;
        }

        info!(service_instance_id = %instance.id, removed, "Old certificates removed from load balancer");
        Ok(())
    }
}

/// Deprovision: detach every certificate of the instance
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveCertificateFromAlb;

#[async_trait]
impl Step for RemoveCertificateFromAlb {
    fn id(&self) -> StepId {
        StepId::RemoveCertificateFromAlb
    }

    fn description(&self) -> &'static str {
        step_descriptions::REMOVE_CERTIFICATE_FROM_ALB
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let certificates = ctx.store.list_certificates(&instance.id).await?;
        let all: Vec<&Certificate> = certificates.iter().collect();

        let listeners = [
            instance.alb.alb_listener_arn.as_deref(),
            instance.alb.previous_alb_listener_arn.as_deref(),
        ];
        for listener in listeners.into_iter().flatten() {
            detach_certificates(ctx, listener, &all).await?;
        }
        Ok(())
    }
}
