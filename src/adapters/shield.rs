use async_trait::async_trait;

use crate::error::AdapterResult;

/// DDoS protection API
#[async_trait]
pub trait Shield: Send + Sync {
    /// Protection covering a resource, if any
    async fn find_protection_id(&self, resource_arn: &str) -> AdapterResult<Option<String>>;

    async fn associate_health_check(
        &self,
        protection_id: &str,
        health_check_arn: &str,
    ) -> AdapterResult<()>;

    async fn disassociate_health_check(
        &self,
        protection_id: &str,
        health_check_arn: &str,
    ) -> AdapterResult<()>;
}
