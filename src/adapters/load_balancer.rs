use async_trait::async_trait;

use crate::error::AdapterResult;

/// Address alias records point at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerAddress {
    pub dns_name: String,
    pub hosted_zone_id: String,
}

/// Application load balancer API
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Certificate ARNs currently on the listener
    async fn list_listener_certificates(&self, listener_arn: &str) -> AdapterResult<Vec<String>>;

    async fn add_listener_certificate(
        &self,
        listener_arn: &str,
        certificate_arn: &str,
    ) -> AdapterResult<()>;

    async fn remove_listener_certificate(
        &self,
        listener_arn: &str,
        certificate_arn: &str,
    ) -> AdapterResult<()>;

    async fn describe_load_balancer(&self, alb_arn: &str) -> AdapterResult<LoadBalancerAddress>;

    /// Load balancer a listener belongs to
    async fn listener_load_balancer(&self, listener_arn: &str) -> AdapterResult<String>;

    async fn list_https_listeners(&self, alb_arn: &str) -> AdapterResult<Vec<String>>;
}
