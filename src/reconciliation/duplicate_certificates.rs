//! Cleanup of certificates orphaned by an interrupted rotation
//!
//! A rotation that fails between "front-end updated" and "old certificate
//! deleted" leaves extra certificate rows, possibly still uploaded and still
//! attached to a listener. For every instance that is not mid-operation,
//! everything but the current certificate is detached, deleted from the
//! certificate store and then deleted from the database. A failure on one
//! certificate keeps its row and moves on to the next. When the listeners
//! cannot be read, certificates are deleted without detaching first.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AdapterResultExt, Result};
use crate::models::{Certificate, InstanceKind, ServiceInstance};
use crate::pipeline::StepContext;

/// Outcome of one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateCertificateReport {
    pub instances_found: usize,
    /// Instances left alone because an operation is running
    pub instances_skipped: usize,
    pub certificates_deleted: usize,
    pub listener_detachments: usize,
    /// One entry per certificate that could not be cleaned up
    pub failures: Vec<String>,
}

/// Certificates attached to each known listener, read once per run
struct ListenerIndex {
    listeners: Vec<(String, Vec<String>)>,
}

impl ListenerIndex {
    async fn load(ctx: &StepContext) -> Result<Self> {
        let mut arns = ctx.config.alb.shared_listener_arns.clone();
        for listener in ctx.store.list_dedicated_listeners().await? {
            if !arns.contains(&listener.listener_arn) {
                arns.push(listener.listener_arn);
            }
        }

        let mut listeners = Vec::with_capacity(arns.len());
        for arn in arns {
            let attached = ctx
                .adapters
                .load_balancer
                .list_listener_certificates(&arn)
                .await
                .ignore_not_found()?
                .unwrap_or_default();
            listeners.push((arn, attached));
        }
        Ok(Self { listeners })
    }

    fn listeners_holding<'a>(&'a self, certificate_arn: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.listeners
            .iter()
            .filter(move |(_, attached)| attached.iter().any(|arn| arn == certificate_arn))
            .map(|(listener, _)| listener.as_str())
    }

    fn forget(&mut self, listener_arn: &str, certificate_arn: &str) {
        if let Some((_, attached)) = self.listeners.iter_mut().find(|(arn, _)| arn == listener_arn) {
            attached.retain(|arn| arn != certificate_arn);
        }
    }
}

/// Find and remove duplicate certificates across every instance kind
pub async fn reconcile_duplicate_certificates(ctx: &StepContext) -> Result<DuplicateCertificateReport> {
    let mut report = DuplicateCertificateReport::default();
    let mut index: Option<ListenerIndex> = None;
    let mut index_attempted = false;

    for kind in InstanceKind::ALL {
        let duplicates = ctx.store.instances_with_duplicate_certificates(kind).await?;

        for (instance_id, _) in duplicates {
            report.instances_found += 1;
            let Some(mut instance) = ctx.store.get_instance(&instance_id).await? else {
                continue;
            };
            if !ctx.store.live_operations(&instance.id).await?.is_empty() {
                info!(service_instance_id = %instance.id, "Operation in progress; skipping duplicate cleanup");
                report.instances_skipped += 1;
                continue;
            }

            let certificates = ctx.store.list_certificates(&instance.id).await?;
            for certificate in certificates
                .iter()
                .filter(|certificate| Some(certificate.id) != instance.current_certificate_id)
            {
                if certificate.is_uploaded() && !index_attempted {
                    index_attempted = true;
                    match ListenerIndex::load(ctx).await {
                        Ok(loaded) => index = Some(loaded),
                        Err(e) => warn!(
                            error = %e,
                            "Listener certificates unavailable; deleting duplicates without detaching"
                        ),
                    }
                }

                match remove_certificate(ctx, index.as_mut(), certificate).await {
                    Ok(detached) => {
                        report.listener_detachments += detached;
                        report.certificates_deleted += 1;
                    }
                    Err(e) => {
                        warn!(
                            service_instance_id = %instance.id,
                            certificate_id = certificate.id,
                            error = %e,
                            "Duplicate certificate cleanup failed"
                        );
                        report.failures.push(format!("certificate {}: {e}", certificate.id));
                    }
                }
            }

            clear_dangling_new_certificate(ctx, &mut instance).await?;
        }

        emit_remaining(ctx, kind).await?;
    }

    info!(
        found = report.instances_found,
        skipped = report.instances_skipped,
        deleted = report.certificates_deleted,
        detached = report.listener_detachments,
        failures = report.failures.len(),
        "Duplicate certificate reconciliation finished"
    );
    Ok(report)
}

/// Detach, delete from the store, then delete the row; returns detachments
async fn remove_certificate(
    ctx: &StepContext,
    index: Option<&mut ListenerIndex>,
    certificate: &Certificate,
) -> Result<usize> {
    let mut detached = 0;

    if let (Some(arn), Some(index)) = (certificate.iam_server_certificate_arn.as_deref(), index) {
        let holding: Vec<String> = index.listeners_holding(arn).map(str::to_string).collect();
        for listener in holding {
            ctx.adapters
                .load_balancer
                .remove_listener_certificate(&listener, arn)
                .await
                .ignore_not_found()?;
            index.forget(&listener, arn);
            detached += 1;
        }
    }

    if let Some(name) = &certificate.iam_server_certificate_name {
        ctx.adapters
            .certificate_store
            .delete(name)
            .await
            .ignore_not_found()?;
    }

    ctx.store.delete_certificate(certificate.id).await?;
    Ok(detached)
}

/// A failed rotation may leave `new_certificate_id` pointing at a deleted row
async fn clear_dangling_new_certificate(ctx: &StepContext, instance: &mut ServiceInstance) -> Result<()> {
    let Some(new_id) = instance.new_certificate_id else {
        return Ok(());
    };
    if ctx.store.get_certificate(new_id).await?.is_none() {
        instance.new_certificate_id = None;
        ctx.store.update_instance(instance).await?;
    }
    Ok(())
}

async fn emit_remaining(ctx: &StepContext, kind: InstanceKind) -> Result<()> {
    let remaining: i64 = ctx
        .store
        .instances_with_duplicate_certificates(kind)
        .await?
        .iter()
        .map(|(_, count)| count)
        .sum();
    info!(
        metric = "duplicate_certificates_remaining",
        instance_type = %kind,
        value = remaining,
        "Duplicate certificates remaining"
    );
    Ok(())
}
