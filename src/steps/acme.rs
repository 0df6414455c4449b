//! Certificate issuance against the ACME CA

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::constants::step_descriptions;
use crate::crypto;
use crate::error::{BrokerError, Result};
use crate::models::{NewAcmeUser, NewCertificate, NewChallenge, Operation, OperationAction};
use crate::pipeline::{Step, StepContext, StepId};
use crate::state_machine::CertificateRotation;

/// Create the instance's CA account once
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterAcmeUser;

#[async_trait]
impl Step for RegisterAcmeUser {
    fn id(&self) -> StepId {
        StepId::RegisterAcmeUser
    }

    fn description(&self) -> &'static str {
        step_descriptions::REGISTER_ACME_USER
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if instance.acme_user_id.is_some() {
            debug!(service_instance_id = %instance.id, "ACME account already registered");
            return Ok(());
        }

        let account_key = crypto::generate_private_key()?;
        let email = &ctx.config.acme.account_email;
        let account = ctx.adapters.acme.register_account(email, &account_key).await?;

        let user = ctx
            .store
            .insert_acme_user(NewAcmeUser {
                email: email.clone(),
                uri: account.uri,
                private_key_pem: ctx.cipher.encrypt(&account_key)?,
                registration_json: account.registration_json,
            })
            .await?;

        instance.acme_user_id = Some(user.id);
        ctx.store.update_instance(&instance).await?;

        info!(
            service_instance_id = %instance.id,
            acme_user_id = user.id,
            "ACME account registered"
        );
        Ok(())
    }
}

/// Create the certificate row (key and CSR) to rotate in
///
/// An Update whose domain set matches the current certificate, with every
/// challenge answered, needs no new certificate; nothing is created and the
/// downstream certificate steps find no `new_certificate` to work on.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratePrivateKey;

impl GeneratePrivateKey {
    async fn domains_unchanged(
        ctx: &StepContext,
        instance: &crate::models::ServiceInstance,
    ) -> Result<bool> {
        let Some(current) = ctx.current_certificate(instance).await? else {
            return Ok(false);
        };

        let mut requested = instance.domain_names.clone();
        requested.sort();
        let mut certified = current.subject_alternative_names.clone();
        certified.sort();
        if requested != certified {
            return Ok(false);
        }

        let challenges = ctx.store.list_challenges(current.id).await?;
        Ok(challenges.len() == certified.len() && challenges.iter().all(|c| c.answered))
    }
}

#[async_trait]
impl Step for GeneratePrivateKey {
    fn id(&self) -> StepId {
        StepId::GeneratePrivateKey
    }

    fn description(&self) -> &'static str {
        step_descriptions::CREATE_CREDENTIALS
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let mut instance = ctx.load_instance(operation).await?;
        if let Some(pending_id) = instance.new_certificate_id {
            let pending = ctx.store.get_certificate(pending_id).await?;
            if let Some(pending) = pending.filter(|cert| CertificateRotation::matches_domains(&instance, cert)) {
                debug!(
                    service_instance_id = %instance.id,
                    certificate_id = pending.id,
                    "Certificate already being issued"
                );
                return Ok(());
            }

            warn!(
                service_instance_id = %instance.id,
                certificate_id = pending_id,
                "Abandoning certificate requested for a previous domain set"
            );
            CertificateRotation::abandon(&mut instance);
            ctx.store.update_instance(&instance).await?;
        }

        if operation.action == OperationAction::Update && Self::domains_unchanged(ctx, &instance).await? {
            info!(
                service_instance_id = %instance.id,
                operation_id = operation.id,
                "Domain set unchanged; keeping current certificate"
            );
            return Ok(());
        }

        let material = crypto::generate_key_and_csr(&instance.domain_names)?;
        let certificate = ctx
            .store
            .insert_certificate(NewCertificate {
                service_instance_id: instance.id.clone(),
                subject_alternative_names: instance.domain_names.clone(),
                private_key_pem: ctx.cipher.encrypt(&material.private_key_pem)?,
                csr_pem: material.csr_pem,
            })
            .await?;

        CertificateRotation::begin(&mut instance, certificate.id)?;
        ctx.store.update_instance(&instance).await?;

        info!(
            service_instance_id = %instance.id,
            certificate_id = certificate.id,
            domains = instance.domain_names.len(),
            "Certificate credentials created"
        );
        Ok(())
    }
}

/// Submit the order and record one DNS-01 challenge per domain
#[derive(Debug, Clone, Copy, Default)]
pub struct InitiateChallenges;

#[async_trait]
impl Step for InitiateChallenges {
    fn id(&self) -> StepId {
        StepId::InitiateChallenges
    }

    fn description(&self) -> &'static str {
        step_descriptions::INITIATE_CHALLENGES
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let Some(mut certificate) = ctx.new_certificate(&instance).await? else {
            return Ok(());
        };
        let account = ctx.acme_credentials(&instance).await?;

        let order_json = match &certificate.order_json {
            Some(order) => order.clone(),
            None => {
                let csr = certificate.csr_pem.as_deref().ok_or_else(|| {
                    BrokerError::invalid_state(format!("certificate {} has no CSR", certificate.id))
                })?;
                let order = ctx
                    .adapters
                    .acme
                    .submit_order(&account, csr, &certificate.subject_alternative_names)
                    .await?;
                certificate.order_json = Some(order.clone());
                ctx.store.update_certificate(&certificate).await?;
                order
            }
        };

        let existing = ctx.store.list_challenges(certificate.id).await?;
        for domain in &certificate.subject_alternative_names {
            if existing.iter().any(|challenge| &challenge.domain == domain) {
                continue;
            }

            let challenge = ctx
                .adapters
                .acme
                .dns01_challenge(&account, &order_json, domain)
                .await?;
            ctx.store
                .insert_challenge(NewChallenge {
                    certificate_id: certificate.id,
                    domain: domain.clone(),
                    validation_domain: challenge.validation_domain,
                    validation_contents: challenge.validation_contents,
                    body_json: challenge.body_json,
                })
                .await?;
        }

        info!(
            service_instance_id = %instance.id,
            certificate_id = certificate.id,
            "ACME challenges initiated"
        );
        Ok(())
    }
}

/// Tell the CA each challenge's TXT record is in place
#[derive(Debug, Clone, Copy, Default)]
pub struct AnswerChallenges;

#[async_trait]
impl Step for AnswerChallenges {
    fn id(&self) -> StepId {
        StepId::AnswerChallenges
    }

    fn description(&self) -> &'static str {
        step_descriptions::ANSWER_CHALLENGES
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let Some(certificate) = ctx.new_certificate(&instance).await? else {
            return Ok(());
        };

        let pending: Vec<_> = ctx
            .store
            .list_challenges(certificate.id)
            .await?
            .into_iter()
            .filter(|challenge| !challenge.answered)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let account = ctx.acme_credentials(&instance).await?;
        for challenge in pending {
            ctx.adapters
                .acme
                .notify_challenge_ready(&account, &challenge.body_json)
                .await?;
            ctx.store.mark_challenge_answered(challenge.id).await?;
            debug!(
                certificate_id = certificate.id,
                domain = %challenge.domain,
                "Challenge answered"
            );
        }
        Ok(())
    }
}

/// Finalize the order and store leaf, chain and expiry
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrieveCertificate;

#[async_trait]
impl Step for RetrieveCertificate {
    fn id(&self) -> StepId {
        StepId::RetrieveCertificate
    }

    fn description(&self) -> &'static str {
        step_descriptions::RETRIEVE_CERTIFICATE
    }

    async fn execute(&self, ctx: &StepContext, operation: &Operation) -> Result<()> {
        let instance = ctx.load_instance(operation).await?;
        let Some(mut certificate) = ctx.new_certificate(&instance).await? else {
            return Ok(());
        };
        if certificate.is_complete() {
            return Ok(());
        }

        let (order, csr) = match (&certificate.order_json, &certificate.csr_pem) {
            (Some(order), Some(csr)) => (order.clone(), csr.clone()),
            _ => {
                return Err(BrokerError::invalid_state(format!(
                    "certificate {} has no order to finalize",
                    certificate.id
                )))
            }
        };

        let account = ctx.acme_credentials(&instance).await?;
        let fullchain = ctx
            .adapters
            .acme
            .finalize_and_poll(&account, &order, &csr, ctx.config.acme.finalize_timeout())
            .await?;

        let (leaf, _chain) = crypto::split_fullchain(&fullchain);
        if leaf.is_empty() {
            return Err(BrokerError::validation(
                "CA returned no certificate in the full chain",
            ));
        }
        certificate.expires_at = Some(crypto::certificate_expiry(&leaf)?);
        certificate.leaf_pem = Some(leaf);
        certificate.fullchain_pem = Some(fullchain);
        ctx.store.update_certificate(&certificate).await?;

        info!(
            service_instance_id = %instance.id,
            certificate_id = certificate.id,
            expires_at = ?certificate.expires_at,
            "Certificate retrieved"
        );
        Ok(())
    }
}
