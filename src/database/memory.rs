use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::store::BrokerStore;
use crate::error::{BrokerError, Result};
use crate::models::{
    AcmeUser, Certificate, Challenge, DedicatedAlb, DedicatedAlbListener, InstanceKind,
    NewAcmeUser, NewCertificate, NewChallenge, NewOperation, Operation, ServiceInstance,
};

/// In-process store for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    instances: DashMap<String, ServiceInstance>,
    certificates: DashMap<i64, Certificate>,
    challenges: DashMap<i64, Challenge>,
    operations: DashMap<i64, Operation>,
    acme_users: DashMap<i64, AcmeUser>,
    // keyed by ARN; one lock so assignment reads and writes are atomic
    dedicated_albs: RwLock<BTreeMap<String, DedicatedAlb>>,
    dedicated_listeners: RwLock<BTreeMap<String, DedicatedAlbListener>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of certificate rows for an instance
    pub fn certificate_count(&self, service_instance_id: &str) -> usize {
        self.certificates
            .iter()
            .filter(|entry| entry.service_instance_id == service_instance_id)
            .count()
    }
}

#[async_trait]
impl BrokerStore for MemoryStore {
    async fn insert_instance(&self, instance: &ServiceInstance) -> Result<()> {
        if self.instances.contains_key(&instance.id) {
            return Err(BrokerError::validation(format!(
                "service instance {} already exists",
                instance.id
            )));
        }
        self.instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> Result<Option<ServiceInstance>> {
        Ok(self.instances.get(id).map(|entry| entry.clone()))
    }

    async fn update_instance(&self, instance: &ServiceInstance) -> Result<()> {
        let mut entry = self
            .instances
            .get_mut(&instance.id)
            .ok_or_else(|| BrokerError::not_found("service instance", &instance.id))?;
        *entry = instance.clone();
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn list_active_instances(&self) -> Result<Vec<ServiceInstance>> {
        let mut instances: Vec<ServiceInstance> = self
            .instances
            .iter()
            .filter(|entry| !entry.is_deactivated())
            .map(|entry| entry.clone())
            .collect();
        instances.sort_by_key(|instance| instance.created_at);
        Ok(instances)
    }

    async fn count_instances_on_listener(&self, listener_arn: &str) -> Result<i64> {
        let count = self
            .instances
            .iter()
            .filter(|entry| {
                !entry.is_deactivated()
                    && entry.alb.alb_listener_arn.as_deref() == Some(listener_arn)
            })
            .count();
        Ok(count as i64)
    }

    async fn instances_with_duplicate_certificates(
        &self,
        kind: InstanceKind,
    ) -> Result<Vec<(String, i64)>> {
        let mut duplicates = Vec::new();
        for instance in self.instances.iter().filter(|entry| entry.kind == kind) {
            let count = self
                .certificates
                .iter()
                .filter(|cert| {
                    cert.service_instance_id == instance.id
                        && Some(cert.id) != instance.current_certificate_id
                })
                .count() as i64;
            if count > 1 {
                duplicates.push((instance.id.clone(), count));
            }
        }
        duplicates.sort();
        Ok(duplicates)
    }

    async fn insert_certificate(&self, certificate: NewCertificate) -> Result<Certificate> {
        let certificate = Certificate::from_new(self.allocate_id(), certificate);
        self.certificates.insert(certificate.id, certificate.clone());
        Ok(certificate)
    }

    async fn get_certificate(&self, id: i64) -> Result<Option<Certificate>> {
        Ok(self.certificates.get(&id).map(|entry| entry.clone()))
    }

    async fn update_certificate(&self, certificate: &Certificate) -> Result<()> {
        let mut entry = self
            .certificates
            .get_mut(&certificate.id)
            .ok_or_else(|| BrokerError::not_found("certificate", certificate.id))?;
        *entry = certificate.clone();
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_certificate(&self, id: i64) -> Result<bool> {
        let removed = self.certificates.remove(&id).is_some();
        if removed {
            self.challenges.retain(|_, challenge| challenge.certificate_id != id);
        }
        Ok(removed)
    }

    async fn list_certificates(&self, service_instance_id: &str) -> Result<Vec<Certificate>> {
        let mut certificates: Vec<Certificate> = self
            .certificates
            .iter()
            .filter(|entry| entry.service_instance_id == service_instance_id)
            .map(|entry| entry.clone())
            .collect();
        certificates.sort_by_key(|cert| cert.id);
        Ok(certificates)
    }

    async fn insert_challenge(&self, challenge: NewChallenge) -> Result<Challenge> {
        let challenge = Challenge::from_new(self.allocate_id(), challenge);
        self.challenges.insert(challenge.id, challenge.clone());
        Ok(challenge)
    }

    async fn list_challenges(&self, certificate_id: i64) -> Result<Vec<Challenge>> {
        let mut challenges: Vec<Challenge> = self
            .challenges
            .iter()
            .filter(|entry| entry.certificate_id == certificate_id)
            .map(|entry| entry.clone())
            .collect();
        challenges.sort_by_key(|challenge| challenge.id);
        Ok(challenges)
    }

    async fn mark_challenge_answered(&self, id: i64) -> Result<()> {
        let mut entry = self
            .challenges
            .get_mut(&id)
            .ok_or_else(|| BrokerError::not_found("challenge", id))?;
        entry.answered = true;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_operation(&self, operation: NewOperation) -> Result<Operation> {
        let operation = Operation::from_new(self.allocate_id(), operation);
        self.operations.insert(operation.id, operation.clone());
        Ok(operation)
    }

    async fn get_operation(&self, id: i64) -> Result<Option<Operation>> {
        Ok(self.operations.get(&id).map(|entry| entry.clone()))
    }

    async fn update_operation(&self, operation: &Operation) -> Result<()> {
        let mut entry = self
            .operations
            .get_mut(&operation.id)
            .ok_or_else(|| BrokerError::not_found("operation", operation.id))?;
        let canceled_at = entry.canceled_at.or(operation.canceled_at);
        *entry = operation.clone();
        entry.canceled_at = canceled_at;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn list_operations(&self, service_instance_id: &str) -> Result<Vec<Operation>> {
        let mut operations: Vec<Operation> = self
            .operations
            .iter()
            .filter(|entry| entry.service_instance_id == service_instance_id)
            .map(|entry| entry.clone())
            .collect();
        operations.sort_by_key(|op| std::cmp::Reverse(op.id));
        Ok(operations)
    }

    async fn insert_acme_user(&self, user: NewAcmeUser) -> Result<AcmeUser> {
        let user = AcmeUser::from_new(self.allocate_id(), user);
        self.acme_users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_acme_user(&self, id: i64) -> Result<Option<AcmeUser>> {
        Ok(self.acme_users.get(&id).map(|entry| entry.clone()))
    }

    async fn ensure_dedicated_alb(&self, alb_arn: &str, org: Option<&str>) -> Result<DedicatedAlb> {
        let mut albs = self.dedicated_albs.write();
        let alb = albs.entry(alb_arn.to_string()).or_insert_with(|| {
            DedicatedAlb::new(self.allocate_id(), alb_arn, None)
        });
        if alb.dedicated_org.is_none() && org.is_some() {
            alb.dedicated_org = org.map(str::to_string);
            alb.updated_at = Utc::now();
        }
        Ok(alb.clone())
    }

    async fn get_dedicated_alb(&self, alb_arn: &str) -> Result<Option<DedicatedAlb>> {
        Ok(self.dedicated_albs.read().get(alb_arn).cloned())
    }

    async fn list_dedicated_albs(&self) -> Result<Vec<DedicatedAlb>> {
        let mut albs: Vec<DedicatedAlb> = self.dedicated_albs.read().values().cloned().collect();
        albs.sort_by_key(|alb| alb.id);
        Ok(albs)
    }

    async fn update_dedicated_alb(&self, alb: &DedicatedAlb) -> Result<()> {
        let mut albs = self.dedicated_albs.write();
        if let Some(existing) = albs.get_mut(&alb.alb_arn) {
            let org = existing.dedicated_org.clone().or_else(|| alb.dedicated_org.clone());
            *existing = alb.clone();
            existing.dedicated_org = org;
            existing.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn ensure_dedicated_listener(
        &self,
        listener_arn: &str,
        alb_arn: &str,
        org: Option<&str>,
    ) -> Result<bool> {
        let mut listeners = self.dedicated_listeners.write();
        if listeners.contains_key(listener_arn) {
            return Ok(false);
        }
        listeners.insert(
            listener_arn.to_string(),
            DedicatedAlbListener::new(
                self.allocate_id(),
                listener_arn,
                alb_arn,
                org.map(str::to_string),
            ),
        );
        Ok(true)
    }

    async fn list_dedicated_listeners(&self) -> Result<Vec<DedicatedAlbListener>> {
        let mut listeners: Vec<DedicatedAlbListener> =
            self.dedicated_listeners.read().values().cloned().collect();
        listeners.sort_by_key(|listener| listener.id);
        Ok(listeners)
    }

    async fn assign_listener_org(&self, listener_arn: &str, org: &str) -> Result<bool> {
        let mut listeners = self.dedicated_listeners.write();
        let Some(listener) = listeners.get_mut(listener_arn) else {
            return Err(BrokerError::not_found("dedicated alb listener", listener_arn));
        };
        match listener.dedicated_org.as_deref() {
            Some(existing) => Ok(existing == org),
            None => {
                listener.dedicated_org = Some(org.to_string());
                listener.updated_at = Utc::now();
                Ok(true)
            }
        }
    }
}
