//! Renewal scan for certificates close to expiry

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::broker::BrokerService;
use crate::error::Result;
use crate::models::{InstanceKind, Operation};

/// Start a Renew operation for every idle instance whose current
/// certificate expires within the configured window
///
/// Placeholder instances adopted from the legacy broker are skipped; they
/// get a certificate through their plan migration.
pub async fn scan_for_expiring_certificates(broker: &BrokerService) -> Result<Vec<Operation>> {
    let ctx = broker.scheduler().context();
    let cutoff = Utc::now() + Duration::days(ctx.config.renewal.days_before_expiry);
    let mut started = Vec::new();

    for instance in ctx.store.list_active_instances().await? {
        if instance.kind == InstanceKind::Migration {
            continue;
        }
        let Some(certificate) = ctx.current_certificate(&instance).await? else {
            continue;
        };
        let Some(expires_at) = certificate.expires_at else {
            continue;
        };
        if expires_at > cutoff {
            continue;
        }
        if !ctx.store.live_operations(&instance.id).await?.is_empty() {
            warn!(service_instance_id = %instance.id, "Certificate expiring but an operation is running");
            continue;
        }

        let operation = broker.enqueue_renew(&instance.id).await?;
        info!(
            service_instance_id = %instance.id,
            operation_id = operation.id,
            expires_at = %expires_at,
            "Renewal started"
        );
        started.push(operation);
    }
    Ok(started)
}
