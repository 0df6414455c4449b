//! Sync of the dedicated listener pool from the load balancer API

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::pipeline::StepContext;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListenerSyncReport {
    pub albs_scanned: usize,
    pub listeners_added: usize,
    /// Unbound listeners that took over their load balancer's org
    pub listeners_bound: usize,
}

/// Record every HTTPS listener of the dedicated load balancers
///
/// Org assignments already recorded are kept as they are.
pub async fn sync_dedicated_listeners(ctx: &StepContext) -> Result<ListenerSyncReport> {
    let mut report = ListenerSyncReport::default();

    for alb_arn in &ctx.config.alb.dedicated_alb_arns {
        let alb = ctx.store.ensure_dedicated_alb(alb_arn, None).await?;
        report.albs_scanned += 1;

        for listener_arn in ctx.adapters.load_balancer.list_https_listeners(alb_arn).await? {
            let added = ctx
                .store
                .ensure_dedicated_listener(&listener_arn, alb_arn, alb.dedicated_org.as_deref())
                .await?;
            if added {
                report.listeners_added += 1;
            }
        }
    }

    let albs = ctx.store.list_dedicated_albs().await?;
    for listener in ctx.store.list_dedicated_listeners().await? {
        if listener.dedicated_org.is_some() {
            continue;
        }
        let org = albs
            .iter()
            .find(|alb| alb.alb_arn == listener.alb_arn)
            .and_then(|alb| alb.dedicated_org.as_deref());
        if let Some(org) = org {
            if ctx.store.assign_listener_org(&listener.listener_arn, org).await? {
                report.listeners_bound += 1;
            }
        }
    }

    info!(
        albs = report.albs_scanned,
        added = report.listeners_added,
        bound = report.listeners_bound,
        "Dedicated listener sync finished"
    );
    Ok(report)
}
