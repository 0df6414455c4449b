use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    AcmeUser, Certificate, Challenge, DedicatedAlb, DedicatedAlbListener, InstanceKind,
    NewAcmeUser, NewCertificate, NewChallenge, NewOperation, Operation, ServiceInstance,
};

/// Durable state behind the pipeline
///
/// Every step goes through this trait, so the same pipelines run against
/// Postgres ([`super::PgStore`]) or in process ([`super::MemoryStore`]).
#[async_trait]
pub trait BrokerStore: Send + Sync + std::fmt::Debug {
    // Service instances
    async fn insert_instance(&self, instance: &ServiceInstance) -> Result<()>;
    async fn get_instance(&self, id: &str) -> Result<Option<ServiceInstance>>;
    async fn update_instance(&self, instance: &ServiceInstance) -> Result<()>;
    async fn list_active_instances(&self) -> Result<Vec<ServiceInstance>>;
    async fn count_instances_on_listener(&self, listener_arn: &str) -> Result<i64>;
    /// (instance id, duplicate count) for instances of `kind` holding more
    /// than one certificate besides the current one
    async fn instances_with_duplicate_certificates(
        &self,
        kind: InstanceKind,
    ) -> Result<Vec<(String, i64)>>;

    // Certificates
    async fn insert_certificate(&self, certificate: NewCertificate) -> Result<Certificate>;
    async fn get_certificate(&self, id: i64) -> Result<Option<Certificate>>;
    async fn update_certificate(&self, certificate: &Certificate) -> Result<()>;
    /// Deletes the row and its challenges
    async fn delete_certificate(&self, id: i64) -> Result<bool>;
    async fn list_certificates(&self, service_instance_id: &str) -> Result<Vec<Certificate>>;

    // Challenges
    async fn insert_challenge(&self, challenge: NewChallenge) -> Result<Challenge>;
    async fn list_challenges(&self, certificate_id: i64) -> Result<Vec<Challenge>>;
    async fn mark_challenge_answered(&self, id: i64) -> Result<()>;

    // Operations
    async fn insert_operation(&self, operation: NewOperation) -> Result<Operation>;
    async fn get_operation(&self, id: i64) -> Result<Option<Operation>>;
    async fn update_operation(&self, operation: &Operation) -> Result<()>;
    /// Newest first
    async fn list_operations(&self, service_instance_id: &str) -> Result<Vec<Operation>>;

    // ACME accounts
    async fn insert_acme_user(&self, user: NewAcmeUser) -> Result<AcmeUser>;
    async fn get_acme_user(&self, id: i64) -> Result<Option<AcmeUser>>;

    // Dedicated capacity pool
    /// Record a load balancer; binds it to `org` unless it already has one
    async fn ensure_dedicated_alb(&self, alb_arn: &str, org: Option<&str>) -> Result<DedicatedAlb>;
    async fn get_dedicated_alb(&self, alb_arn: &str) -> Result<Option<DedicatedAlb>>;
    async fn list_dedicated_albs(&self) -> Result<Vec<DedicatedAlb>>;
    /// Never overwrites an org that is already set
    async fn update_dedicated_alb(&self, alb: &DedicatedAlb) -> Result<()>;
    /// Returns whether a row was added
    async fn ensure_dedicated_listener(
        &self,
        listener_arn: &str,
        alb_arn: &str,
        org: Option<&str>,
    ) -> Result<bool>;
    async fn list_dedicated_listeners(&self) -> Result<Vec<DedicatedAlbListener>>;
    /// Bind an unbound listener; false when another org holds it
    async fn assign_listener_org(&self, listener_arn: &str, org: &str) -> Result<bool>;

    /// Operations of an instance still running (in progress and not canceled)
    async fn live_operations(&self, service_instance_id: &str) -> Result<Vec<Operation>> {
        let operations = self.list_operations(service_instance_id).await?;
        Ok(operations
            .into_iter()
            .filter(|op| !op.state.is_terminal() && !op.is_canceled())
            .collect())
    }
}
