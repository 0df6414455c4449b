use std::sync::Arc;

use crate::adapters::{AcmeCredentials, Adapters};
use crate::config::BrokerConfig;
use crate::crypto::KeyCipher;
use crate::database::BrokerStore;
use crate::error::{BrokerError, Result};
use crate::models::{Certificate, Operation, ServiceInstance};

/// Everything a step needs: durable state, collaborators and settings
#[derive(Debug, Clone)]
pub struct StepContext {
    pub store: Arc<dyn BrokerStore>,
    pub adapters: Adapters,
    pub config: Arc<BrokerConfig>,
    pub cipher: KeyCipher,
}

impl StepContext {
    pub fn new(
        store: Arc<dyn BrokerStore>,
        adapters: Adapters,
        config: Arc<BrokerConfig>,
    ) -> Result<Self> {
        let key = config.encryption_key()?;
        Ok(Self {
            store,
            adapters,
            config,
            cipher: KeyCipher::new(&key)?,
        })
    }

    pub async fn load_operation(&self, operation_id: i64) -> Result<Operation> {
        self.store
            .get_operation(operation_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("operation", operation_id))
    }

    pub async fn load_instance(&self, operation: &Operation) -> Result<ServiceInstance> {
        self.store
            .get_instance(&operation.service_instance_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("service instance", &operation.service_instance_id))
    }

    pub async fn load_certificate(&self, certificate_id: i64) -> Result<Certificate> {
        self.store
            .get_certificate(certificate_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("certificate", certificate_id))
    }

    /// The certificate being rotated in, if any
    pub async fn new_certificate(&self, instance: &ServiceInstance) -> Result<Option<Certificate>> {
        match instance.new_certificate_id {
            Some(id) => self.load_certificate(id).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn current_certificate(
        &self,
        instance: &ServiceInstance,
    ) -> Result<Option<Certificate>> {
        match instance.current_certificate_id {
            Some(id) => self.load_certificate(id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Credentials of the instance's CA account
    pub async fn acme_credentials(&self, instance: &ServiceInstance) -> Result<AcmeCredentials> {
        let user_id = instance.acme_user_id.ok_or_else(|| {
            BrokerError::invalid_state(format!(
                "service instance {} has no ACME account",
                instance.id
            ))
        })?;
        let user = self
            .store
            .get_acme_user(user_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("acme user", user_id))?;

        Ok(AcmeCredentials {
            uri: user.uri,
            private_key_pem: self.cipher.decrypt(&user.private_key_pem)?,
        })
    }

    /// Record progress on the operation
    pub async fn describe(&self, operation: &mut Operation, description: &str) -> Result<()> {
        operation.step_description = Some(description.to_string());
        self.store.update_operation(operation).await
    }
}
