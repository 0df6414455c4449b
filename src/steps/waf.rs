//! Per-instance web ACL for the dedicated WAF plan

use async_trait::async_trait;
use tracing::{debug, info};

use super::resource_tags;
use crate::adapters::{poll_until, WebAclScope};
use crate::constants::{naming, step_descriptions};
use crate::error::{AdapterError, Result};
use crate::models::{Operation, ServiceInstance};
use crate::pipeline::{Step, StepContext, StepId};
use crate::scheduler::RetryClass;

fn web_acl_name(ctx: &StepContext, instance: &ServiceInstance) -> String {
    instance
        .dedicated_waf
        .web_acl_name
        .clone()
        .unwrap_or_else(|| naming::web_acl_name(&ctx.config.waf.name_prefix, &instance.id))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateWebAcl;

#[async_trait]
impl Step for CreateWebAcl {
    fn id(&self) -> StepId {
        StepId::CreateWebAcl
    }

    fn description(&self) -> &'static str {
        step_descriptions::CREATE_WEB_ACL
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if instance.dedicated_waf.web_acl_arn.is_some() {
            return Ok(());
        }

        let name = web_acl_name(ctx, &instance);
        let waf = &ctx.adapters.waf;
        let web_acl = match waf
            .create_web_acl(
                &name,
                WebAclScope::CloudFront,
                &ctx.config.waf.rule_group_arns,
                &resource_tags(ctx, &instance),
            )
            .await
        {
            Ok(acl) => acl,
            Err(AdapterError::AlreadyExists { .. }) => {
                debug!(web_acl = %name, "Web ACL already exists; adopting it");
                waf.get_web_acl(&name, WebAclScope::CloudFront).await?.0
            }
            Err(e) => return Err(e.into()),
        };

        instance.dedicated_waf.web_acl_id = Some(web_acl.id);
        instance.dedicated_waf.web_acl_arn = Some(web_acl.arn);
        instance.dedicated_waf.web_acl_name = Some(web_acl.name);
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, web_acl = %name, "Web ACL created");
        Ok(())
    }
}

/// Block until the web ACL is readable
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitForWebAcl;

#[async_trait]
impl Step for WaitForWebAcl {
    fn id(&self) -> StepId {
        StepId::WaitForWebAcl
    }

    fn description(&self) -> &'static str {
        step_descriptions::WAIT_FOR_WEB_ACL
    }

    fn retry_class(&self) -> RetryClass {
        RetryClass::Fast
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let name = web_acl_name(ctx, &instance);
        let name = name.as_str();
        let waf = &ctx.adapters.waf;

        poll_until(
            "web ACL availability",
            ctx.config.waf.poll_interval(),
            ctx.config.waf.max_poll_attempts,
            move || async move {
                match waf.get_web_acl(name, WebAclScope::CloudFront).await {
                    Ok(_) => Ok(true),
                    Err(e) if e.is_not_found() => Ok(false),
                    Err(e) => Err(e),
                }
            },
        )
        .await
    }
}

/// Delete the web ACL once the distribution no longer references it
///
/// A stale lock token or a lingering association shows up as a conflict and
/// is retried inside the poll loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteWebAcl;

#[async_trait]
impl Step for DeleteWebAcl {
    fn id(&self) -> StepId {
        StepId::DeleteWebAcl
    }

    fn description(&self) -> &'static str {
        step_descriptions::DELETE_WEB_ACL
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if instance.dedicated_waf.web_acl_arn.is_none() && instance.dedicated_waf.web_acl_name.is_none() {
            return Ok(());
        }

        let name = web_acl_name(ctx, &instance);
        let acl_name = name.as_str();
        let waf = &ctx.adapters.waf;

        poll_until(
            "web ACL deletion",
            ctx.config.waf.poll_interval(),
            ctx.config.waf.max_poll_attempts,
            move || async move {
                let (web_acl, lock_token) = match waf.get_web_acl(acl_name, WebAclScope::CloudFront).await {
                    Ok(found) => found,
                    Err(e) if e.is_not_found() => return Ok(true),
                    Err(e) => return Err(e),
                };
                match waf.delete_web_acl(&web_acl, WebAclScope::CloudFront, &lock_token).await {
                    Ok(()) => Ok(true),
                    Err(e) if e.is_not_found() => Ok(true),
                    Err(e) => Err(e),
                }
            },
        )
        .await?;

        instance.dedicated_waf.web_acl_id = None;
        instance.dedicated_waf.web_acl_arn = None;
        instance.dedicated_waf.web_acl_name = None;
        ctx.store.update_instance(&instance).await?;

        info!(service_instance_id = %instance.id, web_acl = %name, "Web ACL deleted");
        Ok(())
    }
}
