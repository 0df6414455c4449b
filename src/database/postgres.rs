use async_trait::async_trait;
use sqlx::PgPool;

use super::store::BrokerStore;
use crate::error::Result;
use crate::models::{
    AcmeUser, Certificate, Challenge, DedicatedAlb, DedicatedAlbListener, InstanceKind,
    NewAcmeUser, NewCertificate, NewChallenge, NewOperation, Operation, ServiceInstance,
};

/// Postgres-backed store; delegates to the model queries
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BrokerStore for PgStore {
    async fn insert_instance(&self, instance: &ServiceInstance) -> Result<()> {
        ServiceInstance::create(&self.pool, instance).await
    }

    async fn get_instance(&self, id: &str) -> Result<Option<ServiceInstance>> {
        ServiceInstance::find_by_id(&self.pool, id).await
    }

    async fn update_instance(&self, instance: &ServiceInstance) -> Result<()> {
        ServiceInstance::update(&self.pool, instance).await
    }

    async fn list_active_instances(&self) -> Result<Vec<ServiceInstance>> {
        ServiceInstance::list_active(&self.pool).await
    }

    async fn count_instances_on_listener(&self, listener_arn: &str) -> Result<i64> {
        ServiceInstance::count_on_listener(&self.pool, listener_arn).await
    }

    async fn instances_with_duplicate_certificates(
        &self,
        kind: InstanceKind,
    ) -> Result<Vec<(String, i64)>> {
        ServiceInstance::find_with_duplicate_certificates(&self.pool, kind).await
    }

    async fn insert_certificate(&self, certificate: NewCertificate) -> Result<Certificate> {
        Certificate::create(&self.pool, certificate).await
    }

    async fn get_certificate(&self, id: i64) -> Result<Option<Certificate>> {
        Certificate::find_by_id(&self.pool, id).await
    }

    async fn update_certificate(&self, certificate: &Certificate) -> Result<()> {
        Certificate::update(&self.pool, certificate).await
    }

    async fn delete_certificate(&self, id: i64) -> Result<bool> {
        Certificate::delete(&self.pool, id).await
    }

    async fn list_certificates(&self, service_instance_id: &str) -> Result<Vec<Certificate>> {
        Certificate::list_for_instance(&self.pool, service_instance_id).await
    }

    async fn insert_challenge(&self, challenge: NewChallenge) -> Result<Challenge> {
        Challenge::create(&self.pool, challenge).await
    }

    async fn list_challenges(&self, certificate_id: i64) -> Result<Vec<Challenge>> {
        Challenge::list_for_certificate(&self.pool, certificate_id).await
    }

    async fn mark_challenge_answered(&self, id: i64) -> Result<()> {
        Challenge::mark_answered(&self.pool, id).await
    }

    async fn insert_operation(&self, operation: NewOperation) -> Result<Operation> {
        Operation::create(&self.pool, operation).await
    }

    async fn get_operation(&self, id: i64) -> Result<Option<Operation>> {
        Operation::find_by_id(&self.pool, id).await
    }

    async fn update_operation(&self, operation: &Operation) -> Result<()> {
        Operation::update(&self.pool, operation).await
    }

    async fn list_operations(&self, service_instance_id: &str) -> Result<Vec<Operation>> {
        Operation::list_for_instance(&self.pool, service_instance_id).await
    }

    async fn insert_acme_user(&self, user: NewAcmeUser) -> Result<AcmeUser> {
        AcmeUser::create(&self.pool, user).await
    }

    async fn get_acme_user(&self, id: i64) -> Result<Option<AcmeUser>> {
        AcmeUser::find_by_id(&self.pool, id).await
    }

    async fn ensure_dedicated_alb(&self, alb_arn: &str, org: Option<&str>) -> Result<DedicatedAlb> {
        DedicatedAlb::create_if_missing(&self.pool, alb_arn, org).await
    }

    async fn get_dedicated_alb(&self, alb_arn: &str) -> Result<Option<DedicatedAlb>> {
        DedicatedAlb::find_by_arn(&self.pool, alb_arn).await
    }

    async fn list_dedicated_albs(&self) -> Result<Vec<DedicatedAlb>> {
        DedicatedAlb::list_all(&self.pool).await
    }

    async fn update_dedicated_alb(&self, alb: &DedicatedAlb) -> Result<()> {
        DedicatedAlb::update(&self.pool, alb).await
    }

    async fn ensure_dedicated_listener(
        &self,
        listener_arn: &str,
        alb_arn: &str,
        org: Option<&str>,
    ) -> Result<bool> {
        DedicatedAlbListener::create_if_missing(&self.pool, listener_arn, alb_arn, org).await
    }

    async fn list_dedicated_listeners(&self) -> Result<Vec<DedicatedAlbListener>> {
        DedicatedAlbListener::list_all(&self.pool).await
    }

    async fn assign_listener_org(&self, listener_arn: &str, org: &str) -> Result<bool> {
        DedicatedAlbListener::assign_org(&self.pool, listener_arn, org).await
    }
}
