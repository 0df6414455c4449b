//! Certificate store upload and cleanup

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::resource_tags;
use crate::adapters::ServerCertificateUpload;
use crate::constants::{naming, step_descriptions};
use crate::error::{AdapterError, AdapterResultExt, BrokerError, Result};
use crate::models::{Certificate, Operation, ServiceInstance};
use crate::pipeline::{Step, StepContext, StepId};
use crate::state_machine::CertificateRotation;

/// Upload the new certificate under a name unique to instance and certificate
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadCertificate;

#[async_trait]
impl Step for UploadCertificate {
    fn id(&self) -> StepId {
        StepId::UploadCertificate
    }

    fn description(&self) -> &'static str {
        step_descriptions::UPLOAD_CERTIFICATE
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let Some(mut certificate) = ctx.new_certificate(&instance).await? else {
            return Ok(());
        };
        if certificate.is_uploaded() {
            return Ok(());
        }

        let (Some(leaf), Some(encrypted_key)) = (&certificate.leaf_pem, &certificate.private_key_pem)
        else {
            return Err(BrokerError::invalid_state(format!(
                "certificate {} has not been issued",
                certificate.id
            )));
        };

        let name = naming::certificate_name(&instance.id, certificate.id);
        let path = if instance.kind.is_alb() {
            &ctx.config.certificates.alb_path
        } else {
            &ctx.config.certificates.cdn_path
        };
        let private_key = ctx.cipher.decrypt(encrypted_key)?;
        let chain = certificate.chain_pem().unwrap_or_default();

        let store = &ctx.adapters.certificate_store;
        let upload = ServerCertificateUpload {
            name: &name,
            path,
            certificate_body: leaf,
            private_key: &private_key,
            certificate_chain: &chain,
        };
        let stored = match store.upload(&upload).await {
            Ok(stored) => stored,
            Err(AdapterError::AlreadyExists { .. }) => {
                debug!(name = %name, "Certificate already uploaded; adopting it");
                store.get(&name).await?
            }
            Err(e) => return Err(e.into()),
        };
        store.tag(&name, &resource_tags(ctx, &instance)).await?;

        certificate.iam_server_certificate_id = Some(stored.id);
        certificate.iam_server_certificate_name = Some(stored.name);
        certificate.iam_server_certificate_arn = Some(stored.arn);
        ctx.store.update_certificate(&certificate).await?;

        info!(
            service_instance_id = %instance.id,
            certificate_id = certificate.id,
            name = %name,
            "Certificate uploaded"
        );
        Ok(())
    }
}

/// Remove a certificate from the certificate store; gone already is fine
async fn delete_from_store(ctx: &StepContext, certificate: &Certificate) -> Result<()> {
    if let Some(name) = &certificate.iam_server_certificate_name {
        ctx.adapters
            .certificate_store
            .delete(name)
            .await
            .ignore_not_found()?;
    }
    Ok(())
}

/// Detach a certificate from the instance's listeners before it is deleted
async fn detach_from_listeners(
    ctx: &StepContext,
    instance: &ServiceInstance,
    certificate: &Certificate,
) -> Result<()> {
    let Some(arn) = &certificate.iam_server_certificate_arn else {
        return Ok(());
    };

    let listeners = [
        instance.alb.alb_listener_arn.as_deref(),
        instance.alb.previous_alb_listener_arn.as_deref(),
    ];
    for listener in listeners.into_iter().flatten() {
        let attached = ctx
            .adapters
            .load_balancer
            .list_listener_certificates(listener)
            .await
            .ignore_not_found()?
            .unwrap_or_default();
        if attached.contains(arn) {
            warn!(
                certificate_id = certificate.id,
                listener_arn = %listener,
                "Superseded certificate still on listener; removing"
            );
            ctx.adapters
                .load_balancer
                .remove_listener_certificate(listener, arn)
                .await
                .ignore_not_found()?;
        }
    }
    Ok(())
}

/// Delete every certificate the rotation left behind
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOldCertificates;

#[async_trait]
impl Step for DeleteOldCertificates {
    fn id(&self) -> StepId {
        StepId::DeleteOldCertificates
    }

    fn description(&self) -> &'static str {
        step_descriptions::DELETE_OLD_CERTIFICATE
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let certificates = ctx.store.list_certificates(&instance.id).await?;
        let superseded = CertificateRotation::superseded(&instance, &certificates);
        if superseded.is_empty() {
            return Ok(());
        }

        if instance.kind.is_cdn() && superseded.iter().any(|cert| cert.is_uploaded()) {
            // The distribution may still be serving the old certificate at the edge
            tokio::time::sleep(ctx.config.cdn.old_certificate_delay()).await;
        }

        for certificate in superseded {
            if instance.kind.is_alb() {
                detach_from_listeners(ctx, &instance, certificate).await?;
            }
            delete_from_store(ctx, certificate).await?;
            ctx.store.delete_certificate(certificate.id).await?;
            debug!(
                service_instance_id = %instance.id,
                certificate_id = certificate.id,
                "Superseded certificate deleted"
            );
        }
        Ok(())
    }
}

/// Deprovision: delete every certificate of the instance
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteAllCertificates;

#[async_trait]
impl Step for DeleteAllCertificates {
    fn id(&self) -> StepId {
        StepId::DeleteAllCertificates
    }

    fn description(&self) -> &'static str {
        step_descriptions::DELETE_CERTIFICATES
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        let certificates = ctx.store.list_certificates(&instance.id).await?;

        for certificate in &certificates {
            delete_from_store(ctx, certificate).await?;
        }

        if instance.current_certificate_id.is_some() || instance.new_certificate_id.is_some() {
            instance.current_certificate_id = None;
            instance.new_certificate_id = None;
            ctx.store.update_instance(&instance).await?;
        }

        for certificate in &certificates {
            ctx.store.delete_certificate(certificate.id).await?;
        }

        info!(
            service_instance_id = %instance.id,
            certificates = certificates.len(),
            "Certificates deleted"
        );
        Ok(())
    }
}
