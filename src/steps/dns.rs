//! Validation and alias records in the broker's hosted zone

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::adapters::{poll_until, ChangeStatus, DnsRecord};
use crate::constants::step_descriptions;
use crate::error::{AdapterResultExt, BrokerError, Result};
use crate::models::{Operation, ServiceInstance};
use crate::pipeline::{Step, StepContext, StepId};
use crate::scheduler::RetryClass;

/// TXT records answering the unanswered challenges of the new certificate
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateTxtRecords;

#[async_trait]
impl Step for CreateTxtRecords {
    fn id(&self) -> StepId {
        StepId::CreateTxtRecords
    }

    fn description(&self) -> &'static str {
        step_descriptions::CREATE_TXT_RECORDS
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if already_submitted(&instance) {
            return Ok(());
        }
        let Some(certificate) = ctx.new_certificate(&instance).await? else {
            return Ok(());
        };

        let records: Vec<DnsRecord> = ctx
            .store
            .list_challenges(certificate.id)
            .await?
            .into_iter()
            .filter(|challenge| !challenge.answered)
            .map(|challenge| {
                DnsRecord::txt(
                    ctx.config.managed_record_name(&challenge.validation_domain),
                    challenge.validation_contents,
                    ctx.config.dns.txt_ttl,
                )
            })
            .collect();
        if records.is_empty() {
            return Ok(());
        }

        let change_id = ctx
            .adapters
            .dns
            .upsert_records(&ctx.config.dns.hosted_zone_id, &records)
            .await?;
        instance.push_change_id(change_id.clone());
        ctx.store.update_instance(&instance).await?;

        info!(
            service_instance_id = %instance.id,
            change_id = %change_id,
            records = records.len(),
            "TXT records submitted"
        );
        Ok(())
    }
}

/// Block until every recorded DNS change has propagated
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitForDnsChanges;

#[async_trait]
impl Step for WaitForDnsChanges {
    fn id(&self) -> StepId {
        StepId::WaitForDnsChanges
    }

    fn description(&self) -> &'static str {
        step_descriptions::WAIT_FOR_DNS
    }

    fn retry_class(&self) -> RetryClass {
        RetryClass::Fast
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if instance.route53_change_ids.is_empty() {
            return Ok(());
        }

        // one attempt budget across every change bounds the whole wait
        let dns = &ctx.adapters.dns;
        let pending = Mutex::new(instance.route53_change_ids.clone());
        let pending_ref = &pending;
        let waited = poll_until(
            "DNS change propagation",
            ctx.config.dns.change_poll_interval(),
            ctx.config.dns.change_max_attempts,
            move || async move {
                let ids = pending_ref.lock().clone();
                for id in ids {
                    if dns.change_status(&id).await? == ChangeStatus::InSync {
                        debug!(change_id = %id, "DNS change in sync");
                        pending_ref.lock().retain(|pending_id| *pending_id != id);
                    }
                }
                Ok(pending_ref.lock().is_empty())
            },
        )
        .await;

        // Persist what propagated so a retry only waits on what is left
        let remaining = pending.into_inner();
        let propagated: Vec<String> = instance
            .route53_change_ids
            .iter()
            .filter(|id| !remaining.contains(id))
            .cloned()
            .collect();
        if !propagated.is_empty() {
            for id in &propagated {
                instance.remove_change_id(id);
            }
            ctx.store.update_instance(&instance).await?;
        }
        waited
    }
}

/// Every submission is followed by a wait that drains the pending changes,
/// and an operation starts with none pending, so pending changes here were
/// submitted by an earlier run of the same step
fn already_submitted(instance: &ServiceInstance) -> bool {
    if instance.route53_change_ids.is_empty() {
        return false;
    }
    debug!(
        service_instance_id = %instance.id,
        pending = instance.route53_change_ids.len(),
        "DNS changes already submitted"
    );
    true
}

fn alias_target(instance: &ServiceInstance) -> Result<(&str, &str)> {
    match (&instance.domain_internal, &instance.route53_alias_hosted_zone) {
        (Some(target), Some(zone)) => Ok((target, zone)),
        _ => Err(BrokerError::invalid_state(format!(
            "service instance {} has no front-end to alias",
            instance.id
        ))),
    }
}

/// A/AAAA alias records from each managed name to the front-end
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateAliasRecords;

#[async_trait]
impl Step for CreateAliasRecords {
    fn id(&self) -> StepId {
        StepId::CreateAliasRecords
    }

    fn description(&self) -> &'static str {
        step_descriptions::CREATE_ALIAS_RECORDS
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if already_submitted(&instance) {
            return Ok(());
        }
        let (target, zone) = alias_target(&instance)?;

        let mut change_ids = Vec::with_capacity(instance.domain_names.len());
        for domain in &instance.domain_names {
            let records = DnsRecord::alias_pair(&ctx.config.managed_record_name(domain), target, zone);
            let change_id = ctx
                .adapters
                .dns
                .upsert_records(&ctx.config.dns.hosted_zone_id, &records)
                .await?;
            change_ids.push(change_id);
        }

        for change_id in change_ids {
            instance.push_change_id(change_id);
        }
        ctx.store.update_instance(&instance).await?;

        info!(
            service_instance_id = %instance.id,
            domains = instance.domain_names.len(),
            "Alias records submitted"
        );
        Ok(())
    }
}

/// Remove alias records; names that never existed are skipped
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveAliasRecords;

#[async_trait]
impl Step for RemoveAliasRecords {
    fn id(&self) -> StepId {
        StepId::RemoveAliasRecords
    }

    fn description(&self) -> &'static str {
        step_descriptions::REMOVE_ALIAS_RECORDS
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let Ok((target, zone)) = alias_target(&instance) else {
            debug!(service_instance_id = %instance.id, "No front-end recorded; no alias records to remove");
            return Ok(());
        };

        for domain in &instance.domain_names {
            let records = DnsRecord::alias_pair(&ctx.config.managed_record_name(domain), target, zone);
            let removed = ctx
                .adapters
                .dns
                .delete_records(&ctx.config.dns.hosted_zone_id, &records)
                .await
                .ignore_not_found()?;
            debug!(domain = %domain, removed = removed.is_some(), "Alias records removed");
        }
        Ok(())
    }
}

/// Remove the TXT records of every certificate the instance still holds
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveTxtRecords;

#[async_trait]
impl Step for RemoveTxtRecords {
    fn id(&self) -> StepId {
        StepId::RemoveTxtRecords
    }

    fn description(&self) -> &'static str {
        step_descriptions::REMOVE_TXT_RECORDS
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;

        for certificate in ctx.store.list_certificates(&instance.id).await? {
            for challenge in ctx.store.list_challenges(certificate.id).await? {
                let record = DnsRecord::txt(
                    ctx.config.managed_record_name(&challenge.validation_domain),
                    challenge.validation_contents,
                    ctx.config.dns.txt_ttl,
                );
                ctx.adapters
                    .dns
                    .delete_records(&ctx.config.dns.hosted_zone_id, std::slice::from_ref(&record))
                    .await
                    .ignore_not_found()?;
            }
        }
        Ok(())
    }
}
